//! Mock ObjectStore for unit testing
//!
//! Stores objects as JSON in memory, keyed by kind and namespaced name, and
//! emulates resourceVersion-based optimistic concurrency. Tests can inject
//! update failures, slow updates down, and inspect how many updates ran
//! concurrently against the same object.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::{ObjectKey, ObjectStore, StoreObject};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type StorageKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StorageKey, serde_json::Value>,
    next_version: u64,
    update_failures: VecDeque<StoreError>,
    update_delay: Duration,
    update_calls: usize,
    in_flight: HashMap<StorageKey, usize>,
    max_in_flight: HashMap<StorageKey, usize>,
}

/// Mock object store for testing
#[derive(Clone, Default)]
pub struct MockObjectStore {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockObjectStore")
            .field("objects", &self.lock().objects.len())
            .finish()
    }
}

fn storage_key<K: StoreObject>(key: &ObjectKey) -> StorageKey {
    (K::kind(&()).to_string(), key.namespace.clone(), key.name.clone())
}

fn resource_version(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/metadata/resourceVersion").and_then(|v| v.as_str())
}

fn set_resource_version(value: &mut serde_json::Value, version: u64) {
    if let Some(meta) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert(
            "resourceVersion".to_string(),
            serde_json::Value::String(version.to_string()),
        );
    }
}

fn labels_of(value: &serde_json::Value) -> BTreeMap<String, String> {
    value
        .pointer("/metadata/labels")
        .and_then(|l| serde_json::from_value(l.clone()).ok())
        .unwrap_or_default()
}

/// Decrements the in-flight counter even if the update future is dropped.
struct InFlight<'a> {
    store: &'a MockObjectStore,
    key: StorageKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.store.lock().in_flight.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
    }
}

impl MockObjectStore {
    /// Create a new, empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or overwrite an object (for test setup)
    pub fn insert<K: StoreObject>(&self, object: K) -> Result<(), StoreError> {
        let key = ObjectKey::of(&object)?;
        let mut value = serde_json::to_value(&object)?;
        let mut state = self.lock();
        state.next_version += 1;
        let version = state.next_version;
        set_resource_version(&mut value, version);
        state.objects.insert(storage_key::<K>(&key), value);
        Ok(())
    }

    /// Fail the next update calls with the given errors, in order
    pub fn fail_next_updates(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.lock().update_failures.extend(errors);
    }

    /// Hold every update for `delay` before it is applied
    pub fn set_update_delay(&self, delay: Duration) {
        self.lock().update_delay = delay;
    }

    /// Number of update calls received, including failed ones
    pub fn update_calls(&self) -> usize {
        self.lock().update_calls
    }

    /// Highest number of updates observed running at once for one object
    pub fn max_concurrent_updates<K: StoreObject>(&self, key: &ObjectKey) -> usize {
        self.lock()
            .max_in_flight
            .get(&storage_key::<K>(key))
            .copied()
            .unwrap_or(0)
    }

    /// Read an object without going through the async trait (for assertions)
    pub fn snapshot<K: StoreObject>(&self, key: &ObjectKey) -> Option<K> {
        let value = self.lock().objects.get(&storage_key::<K>(key)).cloned()?;
        serde_json::from_value(value).ok()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MockObjectStore {
    async fn get<K: StoreObject>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let value = self
            .lock()
            .objects
            .get(&storage_key::<K>(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: K::kind(&()).to_string(),
                key: key.clone(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let matching: Vec<serde_json::Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.is_none_or(|n| n == ns))
            .filter(|(_, value)| selector.matches(&labels_of(value)))
            .map(|(_, value)| value.clone())
            .collect();

        matching
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(object)?;
        let skey = storage_key::<K>(&key);

        let delay = {
            let mut state = self.lock();
            state.update_calls += 1;
            let count = state.in_flight.entry(skey.clone()).or_insert(0);
            *count += 1;
            let current = *count;
            let max = state.max_in_flight.entry(skey.clone()).or_insert(0);
            *max = (*max).max(current);
            state.update_delay
        };
        let _in_flight = InFlight {
            store: self,
            key: skey.clone(),
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.update_failures.pop_front() {
            return Err(error);
        }

        let stored = state.objects.get(&skey).ok_or_else(|| StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            key: key.clone(),
        })?;

        let requested = object.meta().resource_version.as_deref();
        if let Some(requested) = requested {
            if Some(requested) != resource_version(stored) {
                return Err(StoreError::Conflict {
                    kind: K::kind(&()).to_string(),
                    key,
                    message: format!(
                        "resourceVersion {} is stale (current {})",
                        requested,
                        resource_version(stored).unwrap_or("<none>")
                    ),
                });
            }
        }

        let mut value = serde_json::to_value(object)?;
        state.next_version += 1;
        let version = state.next_version;
        set_resource_version(&mut value, version);
        state.objects.insert(skey, value.clone());
        drop(state);

        Ok(serde_json::from_value(value)?)
    }
}
