//! Annotator
//!
//! Single-consumer actor that records the addresses each node reports as
//! annotations on its `Server` object. Requests for different nodes are
//! applied concurrently; requests for the same node are serialised through a
//! per-node gate so two close address events cannot race each other into a
//! lost update. Writes are last-write-wins by event timestamp.

use crate::backoff::FibonacciBackoff;
use crate::error::{EnqueueError, SinkError};
use crate::metrics::SinkMetrics;
use chrono::{DateTime, Utc};
use crds::{ObservedAddresses, Server};
use metal_store::{ObjectKey, ObjectStore, StoreError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_CONCURRENT_APPLIES: usize = 64;
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(200);
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Addresses to record for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRequest {
    pub node: String,
    /// Addresses that passed the filter, in event order, without duplicates
    pub addresses: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnnotationRequest {
    fn observed(&self) -> ObservedAddresses {
        ObservedAddresses {
            addresses: self.addresses.join(","),
            observed_at: self.timestamp,
        }
    }
}

/// Terminal state of one annotation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// Annotations written
    Applied,
    /// Stored value already matched the request
    Unchanged,
    /// Stored value came from a newer event
    Stale,
    /// Retries exhausted or a permanent store error
    Abandoned,
    /// Still queued when the annotator shut down
    Dropped,
}

impl AnnotationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationOutcome::Applied => "applied",
            AnnotationOutcome::Unchanged => "unchanged",
            AnnotationOutcome::Stale => "stale",
            AnnotationOutcome::Abandoned => "abandoned",
            AnnotationOutcome::Dropped => "dropped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Namespace holding the `Server` objects
    pub namespace: String,
    pub queue_capacity: usize,
    /// Requests taken off the queue at once, waiting or applying
    pub max_concurrent_applies: usize,
    /// How long an enqueue may wait for queue space
    pub submit_timeout: Duration,
    /// Apply attempts per request, including the first
    pub max_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent_applies: DEFAULT_MAX_CONCURRENT_APPLIES,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

/// Sending side of the annotation queue.
#[derive(Debug, Clone)]
pub struct AnnotatorHandle {
    tx: mpsc::Sender<AnnotationRequest>,
    submit_timeout: Duration,
}

impl AnnotatorHandle {
    /// Queue a request, waiting at most the configured submit timeout for space.
    pub async fn enqueue(&self, request: AnnotationRequest) -> Result<(), EnqueueError> {
        match tokio::time::timeout(self.submit_timeout, self.tx.send(request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(EnqueueError::Closed),
            Err(_) => Err(EnqueueError::Full(self.submit_timeout)),
        }
    }

    #[cfg(test)]
    pub(crate) fn channel(
        capacity: usize,
        submit_timeout: Duration,
    ) -> (Self, mpsc::Receiver<AnnotationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, submit_timeout }, rx)
    }
}

/// Per-node mutual exclusion for store applies.
#[derive(Default)]
struct NodeGates {
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl NodeGates {
    async fn acquire(&self, node: &str) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on
            gates.retain(|_, gate| Arc::strong_count(gate) > 1);
            gates.entry(node.to_string()).or_default().clone()
        };
        gate.lock_owned().await
    }
}

/// Decide whether `desired` should replace `current`.
///
/// Returns the terminal outcome when no write is needed.
fn skip_reason(current: &ObservedAddresses, desired: &ObservedAddresses) -> Option<AnnotationOutcome> {
    match current.observed_at.cmp(&desired.observed_at) {
        Ordering::Greater => Some(AnnotationOutcome::Stale),
        Ordering::Less => None,
        Ordering::Equal => match current.addresses.cmp(&desired.addresses) {
            Ordering::Equal => Some(AnnotationOutcome::Unchanged),
            Ordering::Greater => Some(AnnotationOutcome::Stale),
            Ordering::Less => None,
        },
    }
}

/// One read-compare-write pass against the store.
pub async fn apply_once<S: ObjectStore>(
    store: &S,
    namespace: &str,
    request: &AnnotationRequest,
) -> Result<AnnotationOutcome, StoreError> {
    let key = ObjectKey::new(namespace, request.node.as_str());
    let mut server: Server = store.get(&key).await?;

    let desired = request.observed();
    if let Some(outcome) = server
        .observed_addresses()
        .and_then(|current| skip_reason(&current, &desired))
    {
        return Ok(outcome);
    }

    server.set_observed_addresses(&desired);
    store.update(&server).await?;
    Ok(AnnotationOutcome::Applied)
}

async fn apply_with_retry<S: ObjectStore>(
    store: &S,
    config: &AnnotatorConfig,
    request: &AnnotationRequest,
) -> AnnotationOutcome {
    let mut backoff = FibonacciBackoff::new(config.backoff_min, config.backoff_max);
    let mut attempt = 1;

    loop {
        match apply_once(store, &config.namespace, request).await {
            Ok(outcome) => return outcome,
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = backoff.next_backoff();
                warn!(
                    node = %request.node,
                    attempt,
                    error = %e,
                    "Failed to annotate server, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    node = %request.node,
                    attempts = attempt,
                    error = %e,
                    "Abandoning address annotation"
                );
                return AnnotationOutcome::Abandoned;
            }
        }
    }
}

/// Waits for an apply slot, then for the next request.
///
/// Requests stay in the queue while every slot is taken, so a slow store
/// pushes back on [`AnnotatorHandle::enqueue`].
async fn next_request(
    rx: &mut mpsc::Receiver<AnnotationRequest>,
    slots: &Arc<Semaphore>,
) -> Option<(OwnedSemaphorePermit, AnnotationRequest)> {
    let permit = Arc::clone(slots).acquire_owned().await.ok()?;
    let request = rx.recv().await?;
    Some((permit, request))
}

/// Draining side of the annotation queue.
pub struct Annotator<S> {
    store: Arc<S>,
    config: AnnotatorConfig,
    metrics: SinkMetrics,
    span: Span,
    rx: mpsc::Receiver<AnnotationRequest>,
}

impl<S> std::fmt::Debug for Annotator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> Annotator<S>
where
    S: ObjectStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        config: AnnotatorConfig,
        metrics: SinkMetrics,
        span: Span,
    ) -> (Self, AnnotatorHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = AnnotatorHandle {
            tx,
            submit_timeout: config.submit_timeout,
        };
        (
            Self {
                store,
                config,
                metrics,
                span,
                rx,
            },
            handle,
        )
    }

    /// Drain the queue until every handle is dropped or `shutdown` fires.
    ///
    /// On shutdown, queued requests are dropped and in-flight applies are
    /// aborted; both count as `dropped`. When the queue closes normally,
    /// in-flight applies finish first.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SinkError> {
        let span = self.span.clone();
        self.drain(shutdown).instrument(span).await
    }

    async fn drain(self, shutdown: CancellationToken) -> Result<(), SinkError> {
        let Annotator {
            store,
            config,
            metrics,
            mut rx,
            ..
        } = self;
        let config = Arc::new(config);
        let gates = Arc::new(NodeGates::default());
        let slots = Arc::new(Semaphore::new(config.max_concurrent_applies.max(1)));
        let mut in_flight = JoinSet::new();

        info!(namespace = %config.namespace, "Annotator started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Annotation task failed");
                    }
                }

                next = next_request(&mut rx, &slots) => {
                    let Some((permit, request)) = next else {
                        while let Some(joined) = in_flight.join_next().await {
                            if let Err(e) = joined {
                                error!(error = %e, "Annotation task failed");
                            }
                        }
                        info!("Annotation queue closed, annotator stopped");
                        return Ok(());
                    };

                    let store = Arc::clone(&store);
                    let config = Arc::clone(&config);
                    let gates = Arc::clone(&gates);
                    let metrics = metrics.clone();
                    in_flight.spawn(
                        async move {
                            let _permit = permit;
                            let _gate = gates.acquire(&request.node).await;
                            let outcome = apply_with_retry(store.as_ref(), &config, &request).await;
                            metrics.annotation_finished(outcome.as_str());
                            debug!(
                                node = %request.node,
                                addresses = %request.addresses.join(","),
                                outcome = outcome.as_str(),
                                "Address annotation finished"
                            );
                        }
                        .instrument(Span::current()),
                    );
                }
            }
        }

        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            metrics.annotation_finished(AnnotationOutcome::Dropped.as_str());
            dropped += 1;
        }

        in_flight.abort_all();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Err(e) if e.is_cancelled() => {
                    metrics.annotation_finished(AnnotationOutcome::Dropped.as_str());
                    dropped += 1;
                }
                Err(e) => error!(error = %e, "Annotation task failed"),
                Ok(()) => {}
            }
        }
        if dropped > 0 {
            warn!(dropped, "Dropped pending address annotations on shutdown");
        }
        info!("Annotator stopped");
        Ok(())
    }
}
