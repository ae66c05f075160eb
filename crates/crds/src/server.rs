//! Server CRD
//!
//! Represents a bare-metal machine known to the provisioning platform. The
//! events manager records the addresses a machine reports through annotations
//! on this object.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation holding the comma-separated list of observed addresses.
pub const ADDRESSES_ANNOTATION: &str = "dcops.microscaler.io/addresses";

/// Annotation holding the RFC3339 timestamp of the event that produced
/// [`ADDRESSES_ANNOTATION`].
pub const ADDRESSES_OBSERVED_AT_ANNOTATION: &str = "dcops.microscaler.io/addresses-observed-at";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Server",
    namespaced,
    status = "ServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Hardware UUID reported by the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Hostname reported by the machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Whether the server may be allocated to a workload cluster
    #[serde(default)]
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Whether the server is currently bound to a cluster machine
    #[serde(default)]
    pub in_use: bool,

    /// Whether the server passed its last health probe
    #[serde(default)]
    pub ready: bool,
}

/// Addresses observed for a server, with the time of the event that
/// reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedAddresses {
    pub addresses: String,
    pub observed_at: DateTime<Utc>,
}

impl Server {
    /// Reads the observed-address annotations.
    ///
    /// Returns `None` when either annotation is missing or the timestamp does
    /// not parse, so a damaged record is simply overwritten by the next event.
    pub fn observed_addresses(&self) -> Option<ObservedAddresses> {
        let annotations = self.metadata.annotations.as_ref()?;
        let addresses = annotations.get(ADDRESSES_ANNOTATION)?;
        let observed_at = annotations.get(ADDRESSES_OBSERVED_AT_ANNOTATION)?;
        let observed_at = DateTime::parse_from_rfc3339(observed_at).ok()?;

        Some(ObservedAddresses {
            addresses: addresses.clone(),
            observed_at: observed_at.with_timezone(&Utc),
        })
    }

    /// Writes the observed-address annotations, leaving other annotations intact.
    pub fn set_observed_addresses(&mut self, observed: &ObservedAddresses) {
        let annotations = self.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(ADDRESSES_ANNOTATION.to_string(), observed.addresses.clone());
        annotations.insert(
            ADDRESSES_OBSERVED_AT_ANNOTATION.to_string(),
            observed.observed_at.to_rfc3339(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_observed_addresses_roundtrip_keeps_other_annotations() {
        let mut server = Server::new("node-1", ServerSpec::default());
        server.metadata.annotations = Some(BTreeMap::from([(
            "example.com/owner".to_string(),
            "ops".to_string(),
        )]));

        let observed = ObservedAddresses {
            addresses: "192.168.1.5/24".to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        server.set_observed_addresses(&observed);

        assert_eq!(server.observed_addresses(), Some(observed));
        let annotations = server.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get("example.com/owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_observed_addresses_ignores_bad_timestamp() {
        let mut server = Server::new("node-1", ServerSpec::default());
        server.metadata.annotations = Some(BTreeMap::from([
            (ADDRESSES_ANNOTATION.to_string(), "10.0.0.1".to_string()),
            (ADDRESSES_OBSERVED_AT_ANNOTATION.to_string(), "yesterday".to_string()),
        ]));

        assert_eq!(server.observed_addresses(), None);
    }
}
