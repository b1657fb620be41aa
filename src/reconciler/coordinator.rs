//! Eviction coordinator
//!
//! Switches the Longhorn node behind every node kured is about to reboot
//! into eviction, once.

use super::{Context, PassReport};
use crate::domain::ports::{ClusterNode, EvictionUpdate};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use tracing::{error, info};

pub(crate) const STEP: &str = "request_eviction";

/// Request eviction on the Longhorn nodes matching `candidates`.
///
/// Longhorn nodes already carrying the drain marker are left untouched, so
/// re-running the step never re-patches a node.
pub async fn request_evictions(
    ctx: &Context,
    candidates: &[&ClusterNode],
    report: &mut PassReport,
) -> Result<()> {
    let key = ctx.config.annotation_key.as_str();
    let storage_nodes = ctx.api.list_storage_nodes().await?;

    info!(
        "Longhorn nodes: {:?}",
        storage_nodes.iter().map(|n| n.name.as_str()).collect::<Vec<_>>()
    );

    let wanted: BTreeSet<&str> = candidates.iter().map(|n| n.name.as_str()).collect();

    for node in storage_nodes.iter().filter(|n| wanted.contains(n.name.as_str())) {
        if node.is_draining(key) {
            info!("Node {} already being drained", node.name);
            continue;
        }

        let update = EvictionUpdate::request(&node.name, key);
        match ctx.api.update_storage_node(&update).await {
            Ok(()) => {
                info!("Requested eviction of Longhorn node {}", node.name);
                ctx.metrics.evictions_requested.inc();
                report.evictions_requested.push(node.name.clone());
            }
            Err(e) => {
                error!("An error occurred while evicting node {}: {}", node.name, e);
                let err = Error::resource_operation("request eviction on", "nodes.longhorn.io", &node.name, e);
                ctx.absorb(STEP, err, report)?;
            }
        }
    }

    Ok(())
}
