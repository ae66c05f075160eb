//! ObjectStore trait for mocking
//!
//! This trait abstracts the Kubernetes API down to get/list/update so
//! controllers can be unit tested against an in-memory store.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Namespaced name of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object, if it carries both name and namespace.
    pub fn of<K: Resource>(object: &K) -> Result<Self, StoreError> {
        let meta = object.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| StoreError::InvalidObject("object has no name".to_string()))?;
        let namespace = meta.namespace.clone().ok_or_else(|| {
            StoreError::InvalidObject(format!("object {} has no namespace", name))
        })?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Objects the store can hold: namespaced, statically typed Kubernetes resources.
pub trait StoreObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + DeserializeOwned
    + Serialize
    + fmt::Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + fmt::Debug
        + Send
        + Sync
        + 'static
{
}

/// Trait for object store operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch a single object.
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// List objects matching `selector`, across all namespaces when `namespace` is `None`.
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<K>, StoreError>;

    /// Replace an object. The object's resourceVersion is used for optimistic
    /// concurrency; a stale version yields [`StoreError::Conflict`].
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;
}
