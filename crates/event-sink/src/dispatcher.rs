//! Event dispatcher
//!
//! [`Adapter`] is the [`EventHandler`] the server calls for every decoded
//! event. Address events are filtered and turned into annotation requests;
//! every other kind is only logged.

use crate::annotator::{AnnotationRequest, AnnotatorHandle};
use crate::events::{AddressEvent, EventEnvelope, EventPayload};
use crate::filter::NegativeFilter;
use crate::metrics::SinkMetrics;
use crate::server::EventHandler;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info, warn};

/// Reported addresses split by the negative filter.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FilteredAddresses {
    /// Addresses to annotate, in reported order, without duplicates
    pub kept: Vec<String>,
    /// Number of addresses inside an excluded prefix
    pub excluded: usize,
    /// Addresses that are not an IP or CIDR
    pub unparseable: Vec<String>,
}

/// Apply the negative filter to the addresses of one event.
pub fn filter_addresses(filter: &NegativeFilter, reported: &[String]) -> FilteredAddresses {
    let mut result = FilteredAddresses::default();
    // Duplicates are by address, whatever the prefix text; the first form wins
    let mut seen: Vec<IpAddr> = Vec::new();

    for address in reported {
        let Some(ip) = AddressEvent::parse_address(address) else {
            result.unparseable.push(address.clone());
            continue;
        };
        if filter.is_excluded(ip) {
            result.excluded += 1;
        } else if !seen.contains(&ip) {
            seen.push(ip);
            result.kept.push(address.clone());
        }
    }

    result
}

/// Routes decoded events to the annotator or the log.
#[derive(Debug, Clone)]
pub struct Adapter {
    annotator: AnnotatorHandle,
    filter: Arc<NegativeFilter>,
    metrics: SinkMetrics,
    span: Span,
}

impl Adapter {
    pub fn new(
        annotator: AnnotatorHandle,
        filter: Arc<NegativeFilter>,
        metrics: SinkMetrics,
        span: Span,
    ) -> Self {
        Self {
            annotator,
            filter,
            metrics,
            span,
        }
    }

    /// Build the annotation request for an address event, if any address survives.
    pub fn address_request(&self, envelope: &EventEnvelope, event: &AddressEvent) -> Option<AnnotationRequest> {
        let filtered = filter_addresses(&self.filter, &event.addresses);

        if !filtered.unparseable.is_empty() {
            warn!(
                node = %envelope.node,
                addresses = ?filtered.unparseable,
                "Ignoring unparseable addresses"
            );
        }
        self.metrics.addresses_excluded(filtered.excluded);

        if filtered.kept.is_empty() {
            self.metrics.address_event_suppressed();
            debug!(
                node = %envelope.node,
                excluded = filtered.excluded,
                "No addresses left after filtering"
            );
            return None;
        }

        Some(AnnotationRequest {
            node: envelope.node.clone(),
            addresses: filtered.kept,
            timestamp: envelope.timestamp,
        })
    }

    async fn dispatch(&self, envelope: EventEnvelope) {
        let node = envelope.node.as_str();

        match &envelope.payload {
            EventPayload::Address(event) => {
                info!(
                    node,
                    hostname = %event.hostname,
                    addresses = ?event.addresses,
                    "Addresses reported"
                );
                if let Some(request) = self.address_request(&envelope, event) {
                    if let Err(e) = self.annotator.enqueue(request).await {
                        self.metrics.annotation_finished("dropped");
                        warn!(node, error = %e, "Failed to queue address annotation");
                    }
                }
            }
            EventPayload::ConfigValidationError(event) => {
                warn!(node, error = %event.error, "Machine config validation failed");
            }
            EventPayload::ConfigLoadError(event) => {
                warn!(node, error = %event.error, "Machine config load failed");
            }
            EventPayload::Phase(event) => {
                info!(node, phase = %event.phase, action = ?event.action, "Phase");
            }
            EventPayload::Task(event) => {
                info!(node, task = %event.task, action = ?event.action, "Task");
            }
            EventPayload::ServiceState(event) => {
                let healthy = event.health.as_ref().map(|h| h.healthy);
                info!(
                    node,
                    service = %event.service,
                    action = ?event.action,
                    healthy = ?healthy,
                    message = %event.message,
                    "Service state"
                );
            }
            EventPayload::Sequence(event) => match &event.error {
                Some(err) => warn!(
                    node,
                    sequence = %event.sequence,
                    action = ?event.action,
                    code = %err.code,
                    error = %err.message,
                    "Sequence failed"
                ),
                None => info!(node, sequence = %event.sequence, action = ?event.action, "Sequence"),
            },
            EventPayload::Unknown { type_url } => {
                warn!(node, type_url = %type_url, "Ignoring event of unknown kind");
            }
        }
    }
}

#[async_trait]
impl EventHandler for Adapter {
    async fn handle(&self, envelope: EventEnvelope) {
        self.metrics.event_received(envelope.payload.kind());
        let span = self.span.clone();
        self.dispatch(envelope).instrument(span).await
    }
}
