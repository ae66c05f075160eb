//! Cluster Health
//!
//! Resolves a workload cluster's topology from the Cluster API objects in the
//! management cluster and runs the cluster health check against it, retrying
//! for a bounded time while the freshly bootstrapped cluster settles.
//!
//! # Example
//!
//! ```no_run
//! use cluster_health::{ClusterDescriptor, HealthClientConnector};
//! use metal_store::KubeStore;
//!
//! # async fn example<C: HealthClientConnector>(connector: C) -> Result<(), Box<dyn std::error::Error>> {
//! let store = KubeStore::try_default().await?;
//! let cluster = ClusterDescriptor::resolve(&store, &connector, "management", "172.24.0.1".parse()?).await?;
//! cluster.health().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod cluster;
pub mod error;
pub mod health;

pub use client::{ClusterInfo, HealthClient, HealthClientConnector, HealthProgress, HealthStream};
pub use cluster::ClusterDescriptor;
pub use error::{ClusterError, HealthError, RpcCode};
pub use health::RetryPolicy;
