//! Custom Resource Definitions consumed from Longhorn
//!
//! This module contains the Longhorn CRD types the reconciler reads and
//! patches:
//! - Node (`nodes.longhorn.io/v1beta2`): per-node scheduling and eviction
//! - Replica (`replicas.longhorn.io/v1beta1`): replica placement

pub mod longhorn_node;
pub mod longhorn_replica;

pub use longhorn_node::{eviction_patch, LonghornNodeSpec, Node as LonghornNode};
pub use longhorn_replica::{LonghornReplicaSpec, Replica as LonghornReplica};
