//! Longhorn Node CRD
//!
//! Typed view of `nodes.longhorn.io/v1beta2`. Only the scheduling and
//! eviction fields are modelled; everything else Longhorn stores on the
//! object (disks, tags, status) is ignored on decode and never written.

use crate::domain::ports::{EvictionUpdate, StorageNode};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// Longhorn Node CRD
// =============================================================================

/// Longhorn's per-node storage settings.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "longhorn.io",
    version = "v1beta2",
    kind = "Node",
    plural = "nodes",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LonghornNodeSpec {
    /// Whether Longhorn may place new replicas on this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_scheduling: Option<bool>,

    /// Ask Longhorn to move all replicas off this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_requested: Option<bool>,
}

impl From<&Node> for StorageNode {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name_any(),
            // Longhorn defaults a node to schedulable
            allow_scheduling: node.spec.allow_scheduling.unwrap_or(true),
            eviction_requested: node.spec.eviction_requested.unwrap_or(false),
            annotations: node.annotations().clone(),
        }
    }
}

/// Build the JSON merge patch for an [`EvictionUpdate`].
///
/// Touches only the annotation and the two spec flags so the rest of the
/// Longhorn object is left as Longhorn last wrote it.
pub fn eviction_patch(update: &EvictionUpdate) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                update.annotation_key.as_str(): update.annotation_value,
            }
        },
        "spec": {
            "allowScheduling": update.allow_scheduling,
            "evictionRequested": update.eviction_requested,
        }
    })
}
