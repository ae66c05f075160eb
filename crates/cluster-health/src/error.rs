//! Cluster health errors

use metal_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Topology resolution failures. No descriptor is produced on any of them.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("cluster {0} has no control plane reference")]
    MissingControlPlaneRef(String),

    #[error("not enough machines found")]
    NotEnoughMachines,

    #[error("failed to find talosconfig data in secret {0}")]
    MissingTalosConfig(String),

    #[error("no control-plane nodes found")]
    NoControlPlaneNodes,

    #[error("unexpected number of machine deployments: {0}")]
    UnexpectedMachineDeployments(usize),

    /// The cluster client could not be built from the talosconfig
    #[error("failed to connect to cluster: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Status codes the health RPC can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    Canceled,
    DeadlineExceeded,
    Unavailable,
    Unauthenticated,
    PermissionDenied,
    Internal,
    Unknown,
}

#[derive(Debug, Error)]
pub enum HealthError {
    /// Transport or RPC status failure
    #[error("health check RPC failed ({code:?}): {message}")]
    Rpc { code: RpcCode, message: String },

    /// A progress message reported a failed check
    #[error("healthcheck error: {0}")]
    Check(String),

    /// The attempt was cut short by the overall budget
    #[error("health check attempt interrupted by deadline")]
    AttemptDeadline,

    /// Budget spent without a passing attempt
    #[error("cluster not healthy after {budget:?}: {last}")]
    Timeout {
        budget: Duration,
        #[source]
        last: Box<HealthError>,
    },
}

impl HealthError {
    /// Whether the error ends a health stream normally.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            HealthError::Rpc {
                code: RpcCode::Canceled,
                ..
            }
        )
    }
}
