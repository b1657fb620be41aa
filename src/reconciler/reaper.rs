//! Instance-manager reaper
//!
//! Once every replica has left a drained node, its instance manager no
//! longer serves anything. Deleting it lets Longhorn start a fresh one when
//! the node rejoins after the reboot.

use super::state::NodeState;
use super::{Context, PassReport};
use crate::domain::ports::StorageReplica;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{error, info};

pub(crate) const STEP: &str = "reap_instance_manager";

/// Count replicas per hosting node. Unscheduled replicas are not counted.
pub fn replicas_by_node(replicas: &[StorageReplica]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for replica in replicas.iter().filter(|r| !r.node_id.is_empty()) {
        *counts.entry(replica.node_id.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Delete instance-manager pods on drained nodes that host no replica.
pub async fn reap_instance_managers(ctx: &Context, report: &mut PassReport) -> Result<()> {
    let key = ctx.config.annotation_key.as_str();
    let storage_nodes = ctx.api.list_storage_nodes().await?;

    let draining: Vec<_> = storage_nodes.iter().filter(|n| n.is_draining(key)).collect();
    if draining.is_empty() {
        return Ok(());
    }

    let replicas = ctx.api.list_replicas().await?;
    let counts = replicas_by_node(&replicas);

    for node in draining {
        let on_node = counts.get(node.name.as_str()).copied().unwrap_or(0);
        if NodeState::observe(node, key, on_node) != NodeState::Reaped {
            info!(
                "Node {} has {} replicas, skipping deletion of instance manager until replicas are moved",
                node.name, on_node
            );
            continue;
        }

        info!("Node {} has no replicas, deleting instance manager", node.name);
        let pods = ctx.api.list_instance_manager_pods().await?;
        let targets: Vec<_> = pods
            .iter()
            .filter(|pod| pod.is_instance_manager() && pod.runs_on(&node.name))
            .collect();

        if targets.is_empty() {
            info!("Instance manager not found on node {}", node.name);
            continue;
        }

        for pod in targets {
            info!("Deleting instance manager pod {}", pod.name);
            match ctx.api.delete_pod(&pod.name).await {
                Ok(()) => {
                    ctx.metrics.instance_managers_deleted.inc();
                    report.pods_deleted.push(pod.name.clone());
                }
                Err(e) => {
                    error!(
                        "An error occurred while deleting instance manager pod {}: {}",
                        pod.name, e
                    );
                    let err = Error::resource_operation("delete", "Pod", &pod.name, e);
                    ctx.absorb(STEP, err, report)?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::config::{FailurePolicy, ReconcilerConfig};
    use crate::domain::ports::{InstanceManagerPod, StorageNode, REBOOT_IN_PROGRESS_ANNOTATION as KEY};
    use crate::reconciler::tests::context;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn seeded() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_storage_node(StorageNode::new("n1").with_annotation(KEY, "true"));
        cluster.put_pod(InstanceManagerPod::new("instance-manager-n1", "n1"));
        cluster
    }

    #[test]
    fn test_replicas_by_node() {
        let replicas = vec![
            StorageReplica::new("r1", "n1"),
            StorageReplica::new("r2", "n1"),
            StorageReplica::new("r3", "n2"),
            StorageReplica::new("r4", ""),
        ];
        let counts = replicas_by_node(&replicas);
        assert_eq!(counts.get("n1"), Some(&2));
        assert_eq!(counts.get("n2"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[tokio::test]
    async fn test_replica_present_blocks_deletion() {
        let cluster = seeded();
        cluster.put_replica(StorageReplica::new("pvc-1-r-1", "n1"));
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();
        assert!(cluster.deleted_pods().is_empty());

        cluster.remove_replica("pvc-1-r-1");
        reap_instance_managers(&ctx, &mut report).await.unwrap();
        assert_eq!(cluster.deleted_pods(), vec!["instance-manager-n1"]);
        assert_eq!(report.pods_deleted, vec!["instance-manager-n1"]);
        assert_eq!(ctx.metrics.instance_managers_deleted.get(), 1);
    }

    #[tokio::test]
    async fn test_replicas_on_other_nodes_do_not_block() {
        let cluster = seeded();
        cluster.put_replica(StorageReplica::new("pvc-1-r-2", "n2"));
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();

        assert_eq!(cluster.deleted_pods(), vec!["instance-manager-n1"]);
    }

    #[tokio::test]
    async fn test_only_marked_nodes_are_reaped() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_storage_node(StorageNode::new("n1"));
        cluster.put_storage_node(StorageNode::new("n2").with_annotation(KEY, "false"));
        cluster.put_storage_node(StorageNode::new("n3").with_annotation(KEY, "TRUE"));
        for node in ["n1", "n2", "n3"] {
            cluster.put_pod(InstanceManagerPod::new(format!("instance-manager-{}", node), node));
        }
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();

        assert!(cluster.deleted_pods().is_empty());
    }

    #[tokio::test]
    async fn test_only_instance_managers_on_the_node_are_deleted() {
        let cluster = seeded();
        cluster.put_pod(InstanceManagerPod::new("instance-manager-n2", "n2"));
        cluster.put_pod(InstanceManagerPod {
            name: "longhorn-manager-n1".into(),
            node_name: Some("n1".into()),
            component: None,
        });
        cluster.put_pod(InstanceManagerPod {
            name: "engine-image-n1".into(),
            node_name: Some("n1".into()),
            component: Some("engine-image".into()),
        });
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();

        assert_eq!(cluster.deleted_pods(), vec!["instance-manager-n1"]);
    }

    #[tokio::test]
    async fn test_no_instance_manager_is_a_no_op() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_storage_node(StorageNode::new("n1").with_annotation(KEY, "true"));
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();

        assert!(report.pods_deleted.is_empty());
    }

    #[tokio::test]
    async fn test_replica_list_failure_aborts() {
        let cluster = seeded();
        cluster.fail_list_replicas();
        let ctx = context(cluster.clone(), ReconcilerConfig::default());

        let mut report = PassReport::default();
        let result = reap_instance_managers(&ctx, &mut report).await;

        assert_matches!(result, Err(Error::Internal(_)));
        assert!(cluster.deleted_pods().is_empty());
    }

    #[tokio::test]
    async fn test_delete_failure() {
        let cluster = seeded();
        cluster.put_pod(InstanceManagerPod::new("instance-manager-n1-b", "n1"));
        cluster.fail_delete_pod("instance-manager-n1");

        let ctx = context(cluster.clone(), ReconcilerConfig::default());
        let mut report = PassReport::default();
        let result = reap_instance_managers(&ctx, &mut report).await;
        assert_matches!(
            result,
            Err(Error::ResourceOperationFailed { ref kind, .. }) if kind == "Pod"
        );
        assert!(cluster.deleted_pods().is_empty());

        let config = ReconcilerConfig {
            failure_policy: FailurePolicy::SkipFailedResource,
            ..Default::default()
        };
        let ctx = context(cluster.clone(), config);
        let mut report = PassReport::default();
        reap_instance_managers(&ctx, &mut report).await.unwrap();
        assert_eq!(cluster.deleted_pods(), vec!["instance-manager-n1-b"]);
        assert_eq!(report.failures[0].resource, "instance-manager-n1");
        assert_eq!(
            ctx.metrics.resource_failures.with_label_values(&[STEP]).get(),
            1
        );
    }
}
