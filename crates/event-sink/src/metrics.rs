//! Prometheus metrics for the event sink.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `sink_events_total` | Counter | `kind` |
//! | `sink_addresses_excluded_total` | Counter | |
//! | `sink_address_events_suppressed_total` | Counter | |
//! | `sink_streams_active` | Gauge | |
//! | `sink_stream_errors_total` | Counter | |
//! | `annotator_requests_total` | Counter | `outcome` |
//!
//! Metrics are registered on a caller-provided [`Registry`]; nothing touches
//! the process-global default registry.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Event sink metrics. Clones share the underlying series.
#[derive(Clone)]
pub struct SinkMetrics {
    events_total: IntCounterVec,
    addresses_excluded_total: IntCounter,
    address_events_suppressed_total: IntCounter,
    streams_active: IntGauge,
    stream_errors_total: IntCounter,
    annotator_requests_total: IntCounterVec,
}

impl std::fmt::Debug for SinkMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkMetrics")
            .field("streams_active", &self.streams_active.get())
            .finish_non_exhaustive()
    }
}

impl SinkMetrics {
    /// Creates the metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let events_total = IntCounterVec::new(
            Opts::new("sink_events_total", "Events received, by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let addresses_excluded_total = IntCounter::new(
            "sink_addresses_excluded_total",
            "Reported addresses dropped by the negative address filter",
        )?;
        registry.register(Box::new(addresses_excluded_total.clone()))?;

        let address_events_suppressed_total = IntCounter::new(
            "sink_address_events_suppressed_total",
            "Address events with no address left after filtering",
        )?;
        registry.register(Box::new(address_events_suppressed_total.clone()))?;

        let streams_active = IntGauge::new("sink_streams_active", "Open event streams")?;
        registry.register(Box::new(streams_active.clone()))?;

        let stream_errors_total = IntCounter::new(
            "sink_stream_errors_total",
            "Event streams closed because of a transport or decode error",
        )?;
        registry.register(Box::new(stream_errors_total.clone()))?;

        let annotator_requests_total = IntCounterVec::new(
            Opts::new("annotator_requests_total", "Annotation requests, by final outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(annotator_requests_total.clone()))?;

        Ok(Self {
            events_total,
            addresses_excluded_total,
            address_events_suppressed_total,
            streams_active,
            stream_errors_total,
            annotator_requests_total,
        })
    }

    pub fn event_received(&self, kind: &str) {
        self.events_total.with_label_values(&[kind]).inc();
    }

    pub fn addresses_excluded(&self, count: usize) {
        self.addresses_excluded_total.inc_by(count as u64);
    }

    pub fn address_event_suppressed(&self) {
        self.address_events_suppressed_total.inc();
    }

    pub fn stream_opened(&self) {
        self.streams_active.inc();
    }

    pub fn stream_closed(&self) {
        self.streams_active.dec();
    }

    pub fn stream_error(&self) {
        self.stream_errors_total.inc();
    }

    pub fn annotation_finished(&self, outcome: &str) {
        self.annotator_requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn events(&self, kind: &str) -> u64 {
        self.events_total.with_label_values(&[kind]).get()
    }

    pub fn annotations(&self, outcome: &str) -> u64 {
        self.annotator_requests_total.with_label_values(&[outcome]).get()
    }

    pub fn suppressed_address_events(&self) -> u64 {
        self.address_events_suppressed_total.get()
    }

    pub fn active_streams(&self) -> i64 {
        self.streams_active.get()
    }
}
