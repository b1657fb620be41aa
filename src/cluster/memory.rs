//! In-Memory Cluster Adapter
//!
//! A [`ClusterApi`] held entirely in process. Writes are applied to the
//! stored objects and recorded, and individual calls can be made to fail,
//! which lets reconciliation passes run without an API server.

use crate::domain::ports::{
    ClusterApi, ClusterNode, EvictionUpdate, InstanceManagerPod, StorageNode, StorageReplica,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
struct ClusterState {
    cluster_nodes: BTreeMap<String, ClusterNode>,
    storage_nodes: BTreeMap<String, StorageNode>,
    replicas: BTreeMap<String, StorageReplica>,
    pods: BTreeMap<String, InstanceManagerPod>,
}

#[derive(Debug, Default)]
struct Faults {
    get_cluster_node: BTreeSet<String>,
    update_storage_node: BTreeSet<String>,
    delete_pod: BTreeSet<String>,
    list_replicas: bool,
}

/// In-process cluster used by tests and benchmarks
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: RwLock<ClusterState>,
    faults: RwLock<Faults>,
    updates: RwLock<Vec<EvictionUpdate>>,
    deleted_pods: RwLock<Vec<String>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Seeding and external mutation
    // -------------------------------------------------------------------------

    /// Insert or replace a Kubernetes node
    pub fn put_cluster_node(&self, node: ClusterNode) {
        self.state
            .write()
            .cluster_nodes
            .insert(node.name.clone(), node);
    }

    /// Insert or replace a Longhorn node
    pub fn put_storage_node(&self, node: StorageNode) {
        self.state
            .write()
            .storage_nodes
            .insert(node.name.clone(), node);
    }

    pub fn put_replica(&self, replica: StorageReplica) {
        self.state
            .write()
            .replicas
            .insert(replica.name.clone(), replica);
    }

    pub fn remove_replica(&self, name: &str) -> Option<StorageReplica> {
        self.state.write().replicas.remove(name)
    }

    pub fn put_pod(&self, pod: InstanceManagerPod) {
        self.state.write().pods.insert(pod.name.clone(), pod);
    }

    /// Cordon or uncordon a node, as kured would
    pub fn set_unschedulable(&self, node: &str, unschedulable: bool) {
        if let Some(node) = self.state.write().cluster_nodes.get_mut(node) {
            node.unschedulable = unschedulable;
        }
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn storage_node(&self, name: &str) -> Option<StorageNode> {
        self.state.read().storage_nodes.get(name).cloned()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state.read().pods.keys().cloned().collect()
    }

    /// Every storage node update accepted so far, in order
    pub fn updates(&self) -> Vec<EvictionUpdate> {
        self.updates.read().clone()
    }

    /// Every pod deleted so far, in order
    pub fn deleted_pods(&self) -> Vec<String> {
        self.deleted_pods.read().clone()
    }

    pub fn clear_history(&self) {
        self.updates.write().clear();
        self.deleted_pods.write().clear();
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    pub fn fail_get_cluster_node(&self, name: impl Into<String>) {
        self.faults.write().get_cluster_node.insert(name.into());
    }

    pub fn fail_update_storage_node(&self, name: impl Into<String>) {
        self.faults.write().update_storage_node.insert(name.into());
    }

    pub fn fail_delete_pod(&self, name: impl Into<String>) {
        self.faults.write().delete_pod.insert(name.into());
    }

    pub fn fail_list_replicas(&self) {
        self.faults.write().list_replicas = true;
    }

    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }
}

fn injected(operation: &str, name: &str) -> Error {
    Error::Internal(format!("injected failure: {} {}", operation, name))
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn list_cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.state.read().cluster_nodes.values().cloned().collect())
    }

    async fn get_cluster_node(&self, name: &str) -> Result<ClusterNode> {
        if self.faults.read().get_cluster_node.contains(name) {
            return Err(injected("get node", name));
        }

        self.state
            .read()
            .cluster_nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Node".into(),
                name: name.into(),
            })
    }

    async fn list_storage_nodes(&self) -> Result<Vec<StorageNode>> {
        Ok(self.state.read().storage_nodes.values().cloned().collect())
    }

    async fn update_storage_node(&self, update: &EvictionUpdate) -> Result<()> {
        if self.faults.read().update_storage_node.contains(&update.node) {
            return Err(injected("update longhorn node", &update.node));
        }

        let mut state = self.state.write();
        let node = state
            .storage_nodes
            .get_mut(&update.node)
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "nodes.longhorn.io".into(),
                name: update.node.clone(),
            })?;
        node.apply(update);
        self.updates.write().push(update.clone());
        Ok(())
    }

    async fn list_replicas(&self) -> Result<Vec<StorageReplica>> {
        if self.faults.read().list_replicas {
            return Err(injected("list", "replicas"));
        }
        Ok(self.state.read().replicas.values().cloned().collect())
    }

    async fn list_instance_manager_pods(&self) -> Result<Vec<InstanceManagerPod>> {
        Ok(self.state.read().pods.values().cloned().collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        if self.faults.read().delete_pod.contains(name) {
            return Err(injected("delete pod", name));
        }

        self.state.write().pods.remove(name);
        self.deleted_pods.write().push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::REBOOT_IN_PROGRESS_ANNOTATION;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_update_applies_and_records() {
        let cluster = InMemoryCluster::new();
        cluster.put_storage_node(StorageNode::new("w1"));

        let update = EvictionUpdate::request("w1", REBOOT_IN_PROGRESS_ANNOTATION);
        cluster.update_storage_node(&update).await.unwrap();

        let node = cluster.storage_node("w1").unwrap();
        assert!(node.eviction_requested);
        assert_eq!(cluster.updates(), vec![update]);
    }

    #[tokio::test]
    async fn test_update_missing_node() {
        let cluster = InMemoryCluster::new();
        let result = cluster
            .update_storage_node(&EvictionUpdate::request("ghost", REBOOT_IN_PROGRESS_ANNOTATION))
            .await;

        assert_matches!(result, Err(Error::ResourceNotFound { .. }));
        assert!(cluster.updates().is_empty());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let cluster = InMemoryCluster::new();
        cluster.put_cluster_node(ClusterNode::new("w1"));
        cluster.put_pod(InstanceManagerPod::new("im-w1", "w1"));

        cluster.fail_get_cluster_node("w1");
        cluster.fail_delete_pod("im-w1");
        assert!(cluster.get_cluster_node("w1").await.is_err());
        assert!(cluster.delete_pod("im-w1").await.is_err());
        assert_eq!(cluster.pod_names(), vec!["im-w1".to_string()]);

        cluster.clear_faults();
        assert!(cluster.get_cluster_node("w1").await.is_ok());
        cluster.delete_pod("im-w1").await.unwrap();
        assert!(cluster.pod_names().is_empty());
        assert_eq!(cluster.deleted_pods(), vec!["im-w1".to_string()]);
    }
}
