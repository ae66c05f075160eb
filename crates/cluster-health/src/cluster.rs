//! Cluster topology resolution
//!
//! A [`ClusterDescriptor`] is built once from the Cluster API state of the
//! management cluster: the cluster object, its control plane, the machines
//! selected by the control plane and by the single worker deployment, and the
//! talosconfig secret used to reach the cluster.

use crate::client::{ClusterInfo, HealthClient, HealthClientConnector};
use crate::error::ClusterError;
use crds::{CLUSTER_NAME_LABEL, Cluster, MACHINE_INTERNAL_IP, Machine, MachineDeployment, TalosControlPlane};
use k8s_openapi::api::core::v1::Secret;
use metal_store::{LabelSelector, ObjectKey, ObjectStore};
use std::net::IpAddr;
use tracing::{debug, info};

/// Namespace the Cluster objects live in.
pub const CLUSTER_NAMESPACE: &str = "default";

/// Key of the talosconfig in the `<cluster>-talosconfig` secret.
pub const TALOSCONFIG_KEY: &str = "talosconfig";

/// A resolved workload cluster.
///
/// Always has at least one control-plane node.
#[derive(Debug)]
pub struct ClusterDescriptor<C> {
    name: String,
    bridge_ip: IpAddr,
    control_plane_nodes: Vec<String>,
    worker_nodes: Vec<String>,
    client: C,
}

/// Internal IPs of machines that are up and not being deleted.
fn machine_endpoints(machines: &[Machine]) -> Vec<String> {
    machines
        .iter()
        .filter(|m| m.is_active())
        .flat_map(|m| m.addresses_of_type(MACHINE_INTERNAL_IP))
        .map(str::to_string)
        .collect()
}

impl<C: HealthClient> ClusterDescriptor<C> {
    /// Builds a descriptor from already known endpoints.
    pub fn new(
        name: impl Into<String>,
        bridge_ip: IpAddr,
        control_plane_nodes: Vec<String>,
        worker_nodes: Vec<String>,
        client: C,
    ) -> Result<Self, ClusterError> {
        if control_plane_nodes.is_empty() {
            return Err(ClusterError::NoControlPlaneNodes);
        }

        Ok(Self {
            name: name.into(),
            bridge_ip,
            control_plane_nodes,
            worker_nodes,
            client,
        })
    }

    /// Resolve the topology of cluster `name` and connect to it.
    pub async fn resolve<S, K>(
        store: &S,
        connector: &K,
        name: &str,
        bridge_ip: IpAddr,
    ) -> Result<Self, ClusterError>
    where
        S: ObjectStore,
        K: HealthClientConnector<Client = C>,
    {
        let cluster: Cluster = store.get(&ObjectKey::new(CLUSTER_NAMESPACE, name)).await?;
        let cluster_namespace = cluster
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| CLUSTER_NAMESPACE.to_string());

        let control_plane_ref = cluster
            .spec
            .control_plane_ref
            .as_ref()
            .ok_or_else(|| ClusterError::MissingControlPlaneRef(name.to_string()))?;
        let control_plane_key = ObjectKey::new(
            control_plane_ref
                .namespace
                .clone()
                .unwrap_or_else(|| cluster_namespace.clone()),
            control_plane_ref.name.as_str(),
        );
        let control_plane: TalosControlPlane = store.get(&control_plane_key).await?;

        let selector: LabelSelector = control_plane
            .status
            .as_ref()
            .map(|s| s.selector.as_str())
            .unwrap_or_default()
            .parse()?;
        let machines: Vec<Machine> = store.list(None, &selector).await?;
        if machines.is_empty() {
            return Err(ClusterError::NotEnoughMachines);
        }

        let secret_name = format!("{}-talosconfig", name);
        let secret: Secret = store
            .get(&ObjectKey::new(cluster_namespace.as_str(), secret_name.as_str()))
            .await?;
        let talosconfig = secret
            .data
            .as_ref()
            .and_then(|data| data.get(TALOSCONFIG_KEY))
            .ok_or(ClusterError::MissingTalosConfig(secret_name))?;

        let control_plane_nodes = machine_endpoints(&machines);
        if control_plane_nodes.is_empty() {
            return Err(ClusterError::NoControlPlaneNodes);
        }

        let deployment_selector = LabelSelector::from_labels([(CLUSTER_NAME_LABEL, name)]);
        let deployments: Vec<MachineDeployment> = store.list(None, &deployment_selector).await?;
        let [deployment] = deployments.as_slice() else {
            return Err(ClusterError::UnexpectedMachineDeployments(deployments.len()));
        };

        let worker_selector: LabelSelector = deployment
            .status
            .as_ref()
            .map(|s| s.selector.as_str())
            .unwrap_or_default()
            .parse()?;
        let workers: Vec<Machine> = store.list(None, &worker_selector).await?;
        let worker_nodes = machine_endpoints(&workers);

        debug!(
            cluster = %name,
            control_plane = ?control_plane_nodes,
            workers = ?worker_nodes,
            "Resolved cluster endpoints"
        );

        let client = connector.connect(&talosconfig.0, &control_plane_nodes).await?;
        info!(
            cluster = %name,
            control_plane_nodes = control_plane_nodes.len(),
            worker_nodes = worker_nodes.len(),
            "Attached to cluster"
        );

        Self::new(name, bridge_ip, control_plane_nodes, worker_nodes, client)
    }
}

impl<C> ClusterDescriptor<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the bridge the cluster's machines are reached through.
    pub fn bridge_ip(&self) -> IpAddr {
        self.bridge_ip
    }

    pub fn control_plane_nodes(&self) -> &[String] {
        &self.control_plane_nodes
    }

    pub fn worker_nodes(&self) -> &[String] {
        &self.worker_nodes
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            control_plane_nodes: self.control_plane_nodes.clone(),
            worker_nodes: self.worker_nodes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HealthStream;
    use crate::error::HealthError;
    use async_trait::async_trait;
    use crds::{
        ClusterSpec, MachineAddress, MachineDeploymentSpec, MachineDeploymentStatus, MachineSpec, MachineStatus,
        ObjectRef, TalosControlPlaneSpec, TalosControlPlaneStatus,
    };
    use k8s_openapi::ByteString;
    use metal_store::MockObjectStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    struct NoopClient;

    #[async_trait]
    impl HealthClient for NoopClient {
        async fn cluster_health_check(
            &self,
            _node: &str,
            _wait_timeout: Duration,
            _info: &ClusterInfo,
        ) -> Result<HealthStream, HealthError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    #[derive(Default)]
    struct RecordingConnector {
        endpoints: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HealthClientConnector for RecordingConnector {
        type Client = NoopClient;

        async fn connect(&self, talosconfig: &[u8], endpoints: &[String]) -> Result<NoopClient, ClusterError> {
            assert_eq!(talosconfig, b"context: management");
            *self.endpoints.lock().unwrap() = endpoints.to_vec();
            Ok(NoopClient)
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn machine(name: &str, role: &str, phase: &str, ip: &str) -> Machine {
        let mut m = Machine::new(
            name,
            MachineSpec {
                cluster_name: "management".to_string(),
            },
        );
        m.metadata.namespace = Some("default".to_string());
        m.metadata.labels = labels(&[(CLUSTER_NAME_LABEL, "management"), ("role", role)]);
        m.status = Some(MachineStatus {
            phase: Some(phase.to_string()),
            addresses: vec![
                MachineAddress {
                    address_type: "ExternalIP".to_string(),
                    address: "203.0.113.10".to_string(),
                },
                MachineAddress {
                    address_type: MACHINE_INTERNAL_IP.to_string(),
                    address: ip.to_string(),
                },
            ],
        });
        m
    }

    /// Management cluster state for a cluster with one control plane and one worker deployment.
    fn seeded_store(control_plane_phase: &str, with_talosconfig: bool) -> MockObjectStore {
        let store = MockObjectStore::new();

        let mut cluster = Cluster::new(
            "management",
            ClusterSpec {
                control_plane_ref: Some(ObjectRef {
                    kind: Some("TalosControlPlane".to_string()),
                    name: "management-cp".to_string(),
                    ..ObjectRef::default()
                }),
            },
        );
        cluster.metadata.namespace = Some("default".to_string());
        store.insert(cluster).unwrap();

        let mut control_plane = TalosControlPlane::new("management-cp", TalosControlPlaneSpec::default());
        control_plane.metadata.namespace = Some("default".to_string());
        control_plane.status = Some(TalosControlPlaneStatus {
            selector: "cluster.x-k8s.io/cluster-name=management,role=control-plane".to_string(),
            ready_replicas: 1,
        });
        store.insert(control_plane).unwrap();

        store.insert(machine("cp-0", "control-plane", control_plane_phase, "172.24.0.2")).unwrap();
        store.insert(machine("worker-0", "worker", "Running", "172.24.0.3")).unwrap();
        store.insert(machine("worker-1", "worker", "Provisioning", "172.24.0.4")).unwrap();

        let mut deployment = MachineDeployment::new("management-workers", MachineDeploymentSpec::default());
        deployment.metadata.namespace = Some("default".to_string());
        deployment.metadata.labels = labels(&[(CLUSTER_NAME_LABEL, "management")]);
        deployment.status = Some(MachineDeploymentStatus {
            selector: "cluster.x-k8s.io/cluster-name=management,role=worker".to_string(),
            replicas: 2,
        });
        store.insert(deployment).unwrap();

        let mut secret = Secret::default();
        secret.metadata.name = Some("management-talosconfig".to_string());
        secret.metadata.namespace = Some("default".to_string());
        if with_talosconfig {
            secret.data = Some(BTreeMap::from([(
                TALOSCONFIG_KEY.to_string(),
                ByteString(b"context: management".to_vec()),
            )]));
        }
        store.insert(secret).unwrap();

        store
    }

    fn bridge() -> IpAddr {
        "172.24.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn test_resolve_splits_nodes_by_role() {
        let store = seeded_store("Running", true);
        let connector = RecordingConnector::default();

        let cluster = ClusterDescriptor::resolve(&store, &connector, "management", bridge())
            .await
            .unwrap();

        assert_eq!(cluster.name(), "management");
        assert_eq!(cluster.bridge_ip(), bridge());
        assert_eq!(cluster.control_plane_nodes(), ["172.24.0.2".to_string()]);
        assert_eq!(cluster.worker_nodes(), ["172.24.0.3".to_string()]);
        assert_eq!(*connector.endpoints.lock().unwrap(), vec!["172.24.0.2".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_fails_without_running_control_plane() {
        let store = seeded_store("Provisioning", true);

        let err = ClusterDescriptor::resolve(&store, &RecordingConnector::default(), "management", bridge())
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::NoControlPlaneNodes));
        assert_eq!(err.to_string(), "no control-plane nodes found");
    }

    #[tokio::test]
    async fn test_resolve_requires_talosconfig() {
        let store = seeded_store("Running", false);

        let err = ClusterDescriptor::resolve(&store, &RecordingConnector::default(), "management", bridge())
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::MissingTalosConfig(name) if name == "management-talosconfig"));
    }

    #[tokio::test]
    async fn test_resolve_requires_exactly_one_deployment() {
        let store = seeded_store("Running", true);
        let mut extra = MachineDeployment::new("management-extra", MachineDeploymentSpec::default());
        extra.metadata.namespace = Some("default".to_string());
        extra.metadata.labels = labels(&[(CLUSTER_NAME_LABEL, "management")]);
        store.insert(extra).unwrap();

        let err = ClusterDescriptor::resolve(&store, &RecordingConnector::default(), "management", bridge())
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::UnexpectedMachineDeployments(2)));
    }

    #[tokio::test]
    async fn test_missing_cluster_is_a_store_error() {
        let store = MockObjectStore::new();

        let err = ClusterDescriptor::resolve(&store, &RecordingConnector::default(), "management", bridge())
            .await
            .unwrap_err();

        assert!(matches!(err, ClusterError::Store(e) if e.is_not_found()));
    }

    #[test]
    fn test_new_rejects_empty_control_plane() {
        let err = ClusterDescriptor::new("c", bridge(), vec![], vec!["10.0.0.2".to_string()], NoopClient).unwrap_err();
        assert!(matches!(err, ClusterError::NoControlPlaneNodes));
    }
}
