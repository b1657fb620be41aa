//! Longhorn Replica CRD
//!
//! Typed view of `replicas.longhorn.io/v1beta1`, reduced to the node a
//! replica lives on.

use crate::domain::ports::StorageReplica;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single data copy of a Longhorn volume.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "longhorn.io",
    version = "v1beta1",
    kind = "Replica",
    plural = "replicas",
    namespaced
)]
pub struct LonghornReplicaSpec {
    /// Node hosting this replica; empty while unscheduled
    #[serde(rename = "nodeID", default)]
    pub node_id: String,
}

impl From<&Replica> for StorageReplica {
    fn from(replica: &Replica) -> Self {
        Self {
            name: replica.name_any(),
            node_id: replica.spec.node_id.clone(),
        }
    }
}
