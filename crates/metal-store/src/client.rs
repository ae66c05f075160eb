//! Kubernetes-backed object store.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::{ObjectKey, ObjectStore, StoreObject};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// [`ObjectStore`] backed by a live Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a store from the in-cluster or kubeconfig environment.
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

/// Maps API status codes onto the store's error vocabulary.
fn classify<K: StoreObject>(error: kube::Error, key: &ObjectKey) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            key: key.clone(),
        },
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            key: key.clone(),
            message: response.message.clone(),
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        debug!("GET {} {}", K::kind(&()), key);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name).await.map_err(|e| classify::<K>(e, key))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<K>, StoreError> {
        debug!(
            "LIST {} in {} matching {:?}",
            K::kind(&()),
            namespace.unwrap_or("all namespaces"),
            selector.to_string()
        );
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector.to_string());
        }

        Ok(api.list(&params).await?.items)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        debug!("REPLACE {} {}", K::kind(&()), key);
        let api: Api<K> = Api::namespaced(self.client.clone(), &key.namespace);
        api.replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(e, &key))
    }
}
