//! Kured annotation scanner

use crate::domain::ports::ClusterNode;
use tracing::debug;

/// Whether an annotation value set by kured means "reboot in progress".
///
/// kured writes a timestamp, but any non-empty value counts, even `"false"`.
/// Only an empty value is ignored.
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty()
}

/// Nodes kured has annotated and already cordoned
pub fn nodes_pending_reboot<'a>(nodes: &'a [ClusterNode], annotation_key: &str) -> Vec<&'a ClusterNode> {
    nodes
        .iter()
        .filter(|node| node.annotation(annotation_key).is_some_and(is_truthy))
        .filter(|node| {
            if node.unschedulable {
                debug!("Node {} is already cordoned", node.name);
            }
            node.unschedulable
        })
        .collect()
}
