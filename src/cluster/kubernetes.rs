//! Kubernetes Cluster Adapter
//!
//! Implements [`ClusterApi`] against a live API server with kube-rs. Wire
//! objects are decoded into domain types here and nowhere else.

use crate::crd::{eviction_patch, LonghornNode, LonghornReplica};
use crate::domain::ports::{
    ClusterApi, ClusterNode, EvictionUpdate, InstanceManagerPod, StorageNode, StorageReplica,
    COMPONENT_LABEL, INSTANCE_MANAGER_COMPONENT,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config, ResourceExt};
use tracing::{debug, info};

// =============================================================================
// Connection
// =============================================================================

/// Where API credentials come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Service account token mounted into the pod
    InCluster,
    /// Local kubeconfig (`KUBECONFIG` or `~/.kube/config`)
    Kubeconfig,
}

impl ConnectionMode {
    pub fn from_flag(not_in_cluster: bool) -> Self {
        if not_in_cluster {
            ConnectionMode::Kubeconfig
        } else {
            ConnectionMode::InCluster
        }
    }
}

// =============================================================================
// Kube Cluster
// =============================================================================

/// Adapter over the Kubernetes and Longhorn APIs
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Load credentials for `mode` and build a client
    pub async fn connect(mode: ConnectionMode, namespace: impl Into<String>) -> Result<Self> {
        let config = match mode {
            ConnectionMode::InCluster => {
                info!("Loading in-cluster configuration");
                Config::incluster().map_err(|e| {
                    Error::Configuration(format!("Failed to load in-cluster configuration: {}", e))
                })?
            }
            ConnectionMode::Kubeconfig => {
                info!("Loading out-of-cluster configuration");
                Config::from_kubeconfig(&KubeConfigOptions::default())
                    .await
                    .map_err(|e| {
                        Error::Configuration(format!("Failed to load kubeconfig: {}", e))
                    })?
            }
        };

        let client = Client::try_from(config)?;
        Ok(Self::new(client, namespace))
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn longhorn_nodes(&self) -> Api<LonghornNode> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn longhorn_replicas(&self) -> Api<LonghornReplica> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        let nodes = self.nodes().list(&ListParams::default()).await?;
        Ok(nodes.items.iter().map(cluster_node).collect())
    }

    async fn get_cluster_node(&self, name: &str) -> Result<ClusterNode> {
        match self.nodes().get_opt(name).await? {
            Some(node) => Ok(cluster_node(&node)),
            None => Err(Error::ResourceNotFound {
                kind: "Node".into(),
                name: name.into(),
            }),
        }
    }

    async fn list_storage_nodes(&self) -> Result<Vec<StorageNode>> {
        let nodes = self.longhorn_nodes().list(&ListParams::default()).await?;
        Ok(nodes.items.iter().map(StorageNode::from).collect())
    }

    async fn update_storage_node(&self, update: &EvictionUpdate) -> Result<()> {
        let patch = eviction_patch(update);
        debug!("Patching Longhorn node {}: {}", update.node, patch);

        self.longhorn_nodes()
            .patch(&update.node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_replicas(&self) -> Result<Vec<StorageReplica>> {
        let replicas = self
            .longhorn_replicas()
            .list(&ListParams::default())
            .await?;
        Ok(replicas.items.iter().map(StorageReplica::from).collect())
    }

    async fn list_instance_manager_pods(&self) -> Result<Vec<InstanceManagerPod>> {
        let selector = format!("{}={}", COMPONENT_LABEL, INSTANCE_MANAGER_COMPONENT);
        let pods = self
            .pods()
            .list(&ListParams::default().labels(&selector))
            .await?;
        Ok(pods.items.iter().map(instance_manager_pod).collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        match self.pods().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Pod {} already deleted", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

fn cluster_node(node: &Node) -> ClusterNode {
    ClusterNode {
        name: node.name_any(),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false),
        annotations: node.annotations().clone(),
    }
}

fn instance_manager_pod(pod: &Pod) -> InstanceManagerPod {
    InstanceManagerPod {
        name: pod.name_any(),
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        component: pod.labels().get(COMPONENT_LABEL).cloned(),
    }
}
