//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for retrying store updates.
//! The sequence grows more slowly than exponential backoff, which suits
//! optimistic-concurrency conflicts that usually clear after one or two retries.
//!
//! Sequence with the annotator defaults: 200ms, 200ms, 400ms, 600ms, 1s, 1.6s, ... capped at 5s.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value
    prev: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff
    ///
    /// # Arguments
    ///
    /// * `min` - First (and second) backoff duration
    /// * `max` - Cap for the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(ms(200), ms(5000));

        assert_eq!(backoff.next_backoff(), ms(200));
        assert_eq!(backoff.next_backoff(), ms(200));
        assert_eq!(backoff.next_backoff(), ms(400));
        assert_eq!(backoff.next_backoff(), ms(600));
        assert_eq!(backoff.next_backoff(), ms(1000));
        assert_eq!(backoff.next_backoff(), ms(1600));
        assert_eq!(backoff.next_backoff(), ms(2600));
        assert_eq!(backoff.next_backoff(), ms(4200));
        // Next would be 6.8s, capped at 5s
        assert_eq!(backoff.next_backoff(), ms(5000));
        assert_eq!(backoff.next_backoff(), ms(5000));
    }
}
