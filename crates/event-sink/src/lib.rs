//! Event Sink
//!
//! Ingests the lifecycle events machines stream to the control plane and turns
//! address reports into annotations on the matching `Server` objects.
//!
//! Data flow:
//! - [`server::EventSinkServer`] accepts framed TCP streams, one task per peer
//! - [`events::EventEnvelope`] decodes each frame into a closed set of event kinds
//! - [`dispatcher::Adapter`] logs every event and filters address events through
//!   the [`filter::NegativeFilter`]
//! - [`annotator::Annotator`] applies surviving addresses to the object store,
//!   serialised per node and last-write-wins by event timestamp

pub mod annotator;
pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod metrics;
pub mod server;

pub use annotator::{AnnotationOutcome, AnnotationRequest, Annotator, AnnotatorConfig, AnnotatorHandle};
pub use dispatcher::{Adapter, FilteredAddresses, filter_addresses};
pub use error::*;
pub use events::{EventEnvelope, EventPayload};
pub use filter::NegativeFilter;
pub use metrics::SinkMetrics;
pub use server::{EventHandler, EventSinkServer, StreamAck, frame_codec};
