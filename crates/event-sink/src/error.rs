//! Event sink errors

use std::time::Duration;
use thiserror::Error;

/// A configured filter prefix could not be parsed.
#[derive(Debug, Error)]
#[error("invalid negative address filter prefix {prefix:?}: {source}")]
pub struct FilterError {
    pub prefix: String,
    #[source]
    pub source: ipnet::AddrParseError,
}

/// An inbound frame could not be decoded into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not a valid event envelope
    #[error("malformed event envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Envelope names a known event kind but its payload does not match
    #[error("malformed {type_url} payload: {source}")]
    Payload {
        type_url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An annotation request could not be handed to the annotator.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// Queue stayed full for the whole submit window
    #[error("annotation queue full for {0:?}")]
    Full(Duration),

    /// Annotator has stopped
    #[error("annotation queue closed")]
    Closed,
}

/// Errors surfaced by the sink's long-running loops.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Serve was asked to run after shutdown had already been requested
    #[error("event sink server stopped")]
    ServerStopped,

    /// Listener or socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metric registration failed
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SinkError {
    /// Whether the error only reports an orderly shutdown.
    pub fn is_benign(&self) -> bool {
        matches!(self, SinkError::ServerStopped)
    }
}

/// Failure of a single event stream. Closes that stream only.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Socket or framing error
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Acknowledgement could not be encoded
    #[error("failed to encode acknowledgement: {0}")]
    Ack(#[source] serde_json::Error),
}
