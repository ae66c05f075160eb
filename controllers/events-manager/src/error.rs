//! Controller-specific error types.

use event_sink::{FilterError, SinkError};
use metal_store::StoreError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur in the Events Manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed negative address filter
    #[error("Invalid configuration: {0}")]
    Filter(#[from] FilterError),

    /// Kubernetes client could not be built
    #[error("Kubernetes error: {0}")]
    Store(#[from] StoreError),

    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Event sink loop failed
    #[error("Event sink error: {0}")]
    Sink(#[from] SinkError),

    /// Metric registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics endpoint failed
    #[error("Metrics endpoint error: {0}")]
    Http(#[source] std::io::Error),

    /// A supervised loop panicked
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ControllerError {
    /// Whether the error only reports an orderly shutdown.
    pub fn is_benign(&self) -> bool {
        match self {
            ControllerError::Sink(e) => e.is_benign(),
            ControllerError::Task(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
