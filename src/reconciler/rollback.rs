//! Eviction rollback
//!
//! kured uncordons a node once it is back from its reboot. That uncordon is
//! the only signal used to hand the Longhorn node back to the scheduler.

use super::{Context, PassReport};
use crate::domain::ports::EvictionUpdate;
use crate::error::{Error, Result};
use tracing::{error, info};

pub(crate) const STEP: &str = "rollback_eviction";

/// Restore scheduling on drained Longhorn nodes whose Kubernetes node is no
/// longer cordoned.
///
/// A failed read of the Kubernetes node always aborts the pass: without it
/// there is no way to tell whether the reboot finished.
pub async fn release_rebooted_nodes(ctx: &Context, report: &mut PassReport) -> Result<()> {
    let key = ctx.config.annotation_key.as_str();
    let storage_nodes = ctx.api.list_storage_nodes().await?;

    for node in storage_nodes.iter().filter(|n| n.is_draining(key)) {
        let cluster_node = match ctx.api.get_cluster_node(&node.name).await {
            Ok(cluster_node) => cluster_node,
            Err(e) => {
                error!("An error occurred while checking node {}: {}", node.name, e);
                return Err(e);
            }
        };

        if cluster_node.unschedulable {
            info!("Node {} is still cordoned", node.name);
            continue;
        }

        info!("Node {} is no longer cordoned", node.name);
        let update = EvictionUpdate::rollback(&node.name, key);
        match ctx.api.update_storage_node(&update).await {
            Ok(()) => {
                info!("Removed eviction status from node {}", node.name);
                ctx.metrics.evictions_rolled_back.inc();
                report.rolled_back.push(node.name.clone());
            }
            Err(e) => {
                error!(
                    "An error occurred while removing eviction from node {}: {}",
                    node.name, e
                );
                let err = Error::resource_operation("roll back eviction on", "nodes.longhorn.io", &node.name, e);
                ctx.absorb(STEP, err, report)?;
            }
        }
    }

    Ok(())
}
