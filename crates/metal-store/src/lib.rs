//! Object store capability for DCops controllers
//!
//! Controllers only ever need three operations against the Kubernetes API:
//! fetch one object, list objects by label selector, and replace an object.
//! This crate narrows the API to exactly that so the event sink and the
//! cluster health checks can run against [`MockObjectStore`] in unit tests.
//!
//! # Example
//!
//! ```no_run
//! use metal_store::{KubeStore, LabelSelector, ObjectKey, ObjectStore};
//! use k8s_openapi::api::core::v1::Secret;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KubeStore::try_default().await?;
//!
//! let secret: Secret = store.get(&ObjectKey::new("default", "management-talosconfig")).await?;
//! let selector: LabelSelector = "cluster.x-k8s.io/cluster-name=management".parse()?;
//! let secrets: Vec<Secret> = store.list(Some("default"), &selector).await?;
//! # let _ = (secret, secrets);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use selector::LabelSelector;
pub use store_trait::{ObjectKey, ObjectStore, StoreObject};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockObjectStore;
