//! Cluster API views
//!
//! Client-side definitions of the Cluster API objects read while resolving a
//! workload cluster's topology. Only the fields the events manager consumes
//! are modelled; unknown fields are ignored on deserialization. These types
//! are never installed, so schema generation is disabled.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Label carrying the owning cluster name on CAPI objects.
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Machine address type for in-cluster addresses.
pub const MACHINE_INTERNAL_IP: &str = "InternalIP";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reference to the control plane provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectRef>,
}

/// Reference to another namespaced object.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "TalosControlPlane",
    namespaced,
    status = "TalosControlPlaneStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TalosControlPlaneSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TalosControlPlaneStatus {
    /// Label selector (string form) matching the control plane machines
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub ready_replicas: i32,
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(default)]
    pub cluster_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub addresses: Vec<MachineAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineAddress {
    #[serde(rename = "type")]
    pub address_type: String,

    pub address: String,
}

/// Lifecycle phase of a CAPI machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachinePhase {
    Pending,
    Provisioning,
    Provisioned,
    Running,
    Deleting,
    Deleted,
    Failed,
    Unknown,
}

impl MachinePhase {
    fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Provisioning" => Self::Provisioning,
            "Provisioned" => Self::Provisioned,
            "Running" => Self::Running,
            "Deleting" => Self::Deleting,
            "Deleted" => Self::Deleted,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl Machine {
    /// Current phase, `Unknown` when the status has not been populated.
    pub fn phase(&self) -> MachinePhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map_or(MachinePhase::Unknown, MachinePhase::parse)
    }

    /// Whether the machine is up and not being torn down.
    pub fn is_active(&self) -> bool {
        self.metadata.deletion_timestamp.is_none()
            && matches!(self.phase(), MachinePhase::Running | MachinePhase::Provisioned)
    }

    /// Addresses of the given type, in status order.
    pub fn addresses_of_type<'a>(&'a self, address_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.status
            .iter()
            .flat_map(|s| s.addresses.iter())
            .filter(move |a| a.address_type == address_type)
            .map(|a| a.address.as_str())
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineDeployment",
    namespaced,
    status = "MachineDeploymentStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    #[serde(default)]
    pub cluster_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentStatus {
    /// Label selector (string form) matching the deployment's machines
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub replicas: i32,
}
