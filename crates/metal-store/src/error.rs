//! Object store errors

use crate::store_trait::ObjectKey;
use thiserror::Error;

/// Errors that can occur when talking to the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API or transport error not covered by a more specific variant
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },

    /// Optimistic concurrency check failed on update
    #[error("conflict updating {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: ObjectKey,
        message: String,
    },

    /// Label selector could not be parsed
    #[error("invalid label selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// Object could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object is missing identity fields required for the operation
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Not-found counts as transient: machines report events before their
    /// `Server` object is registered.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::Conflict { .. } => true,
            StoreError::Kube(kube::Error::Api(response)) => {
                response.code == 429 || response.code >= 500
            }
            StoreError::Kube(kube::Error::SerdeError(_)) => false,
            StoreError::Kube(_) => true,
            StoreError::InvalidSelector { .. }
            | StoreError::Serialization(_)
            | StoreError::InvalidObject(_) => false,
        }
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let key = ObjectKey::new("default", "n1");
        assert!(StoreError::NotFound { kind: "Server".into(), key: key.clone() }.is_transient());
        assert!(StoreError::Conflict {
            kind: "Server".into(),
            key,
            message: "stale".into()
        }
        .is_transient());
        assert!(!StoreError::InvalidObject("missing name".into()).is_transient());
        assert!(!StoreError::InvalidSelector {
            selector: "a in".into(),
            reason: "bad".into()
        }
        .is_transient());
    }
}
