//! Health RPC capability
//!
//! The cluster health check is a server-streaming call on the cluster's
//! control API. Only the shape the monitor needs is modelled here so tests can
//! script the stream.

use crate::error::{ClusterError, HealthError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Nodes the health check covers, by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub control_plane_nodes: Vec<String>,
    pub worker_nodes: Vec<String>,
}

/// One progress message from the health check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthProgress {
    pub message: String,
    /// Non-empty when the check failed
    pub error: String,
}

pub type HealthStream = BoxStream<'static, Result<HealthProgress, HealthError>>;

/// Client for a workload cluster's control API.
#[async_trait]
pub trait HealthClient: Send + Sync {
    /// Start a cluster health check on `node`.
    ///
    /// `wait_timeout` bounds how long the node waits for the cluster to become
    /// healthy before it reports failure.
    async fn cluster_health_check(
        &self,
        node: &str,
        wait_timeout: Duration,
        info: &ClusterInfo,
    ) -> Result<HealthStream, HealthError>;
}

/// Builds a [`HealthClient`] from a talosconfig.
#[async_trait]
pub trait HealthClientConnector: Send + Sync {
    type Client: HealthClient;

    /// Connect using `talosconfig`, overriding its endpoints with `endpoints`.
    async fn connect(&self, talosconfig: &[u8], endpoints: &[String]) -> Result<Self::Client, ClusterError>;
}
