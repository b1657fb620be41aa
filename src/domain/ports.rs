//! Domain Ports - Core trait definitions for the reconciler
//!
//! These types carry only the fields the reconciler reads or writes. The
//! [`ClusterApi`] trait is the boundary to the Kubernetes and Longhorn APIs;
//! adapters in [`crate::cluster`] decode wire objects into these types.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Constants
// =============================================================================

/// Annotation kured places on a node while it owns the reboot, mirrored
/// onto the Longhorn node while an eviction is in flight
pub const REBOOT_IN_PROGRESS_ANNOTATION: &str = "weave.works/kured-reboot-in-progress";

/// Annotation value marking a Longhorn node as being drained by us
pub const ANNOTATION_TRUE: &str = "true";

/// Annotation value written once a drained Longhorn node is released
pub const ANNOTATION_FALSE: &str = "false";

/// Label Longhorn uses to tag the role of its pods
pub const COMPONENT_LABEL: &str = "longhorn.io/component";

/// Component label value of instance-manager pods
pub const INSTANCE_MANAGER_COMPONENT: &str = "instance-manager";

/// Default namespace Longhorn is installed into
pub const DEFAULT_LONGHORN_NAMESPACE: &str = "longhorn-system";

// =============================================================================
// Cluster Node
// =============================================================================

/// A Kubernetes node as seen by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    /// Cordoned state, owned by kured
    pub unschedulable: bool,
    pub annotations: BTreeMap<String, String>,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cordoned(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

// =============================================================================
// Storage Node
// =============================================================================

/// A Longhorn node (`nodes.longhorn.io`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Matches the Kubernetes node name
    pub name: String,
    pub allow_scheduling: bool,
    pub eviction_requested: bool,
    pub annotations: BTreeMap<String, String>,
}

impl StorageNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allow_scheduling: true,
            eviction_requested: false,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Whether this node carries our drain marker.
    ///
    /// Strict equality with `"true"`; any other value means the node is not
    /// being drained by us.
    pub fn is_draining(&self, key: &str) -> bool {
        self.annotation(key) == Some(ANNOTATION_TRUE)
    }

    /// Apply an update locally, the way the API server would after a patch
    pub fn apply(&mut self, update: &EvictionUpdate) {
        self.allow_scheduling = update.allow_scheduling;
        self.eviction_requested = update.eviction_requested;
        self.annotations
            .insert(update.annotation_key.clone(), update.annotation_value.to_string());
    }
}

/// Field changes written to a Longhorn node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionUpdate {
    pub node: String,
    pub allow_scheduling: bool,
    pub eviction_requested: bool,
    pub annotation_key: String,
    pub annotation_value: String,
}

impl EvictionUpdate {
    /// Stop scheduling on the node and ask Longhorn to move replicas off it
    pub fn request(node: impl Into<String>, annotation_key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            allow_scheduling: false,
            eviction_requested: true,
            annotation_key: annotation_key.into(),
            annotation_value: ANNOTATION_TRUE.to_string(),
        }
    }

    /// Undo [`EvictionUpdate::request`] once the reboot is over
    pub fn rollback(node: impl Into<String>, annotation_key: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            allow_scheduling: true,
            eviction_requested: false,
            annotation_key: annotation_key.into(),
            annotation_value: ANNOTATION_FALSE.to_string(),
        }
    }
}

// =============================================================================
// Replicas and Pods
// =============================================================================

/// A Longhorn replica (`replicas.longhorn.io`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReplica {
    pub name: String,
    /// Name of the node hosting the replica
    pub node_id: String,
}

impl StorageReplica {
    pub fn new(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
        }
    }
}

/// A pod in the Longhorn namespace that may be an instance manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceManagerPod {
    pub name: String,
    pub node_name: Option<String>,
    /// Value of the `longhorn.io/component` label
    pub component: Option<String>,
}

impl InstanceManagerPod {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_name: Some(node_name.into()),
            component: Some(INSTANCE_MANAGER_COMPONENT.to_string()),
        }
    }

    pub fn is_instance_manager(&self) -> bool {
        self.component.as_deref() == Some(INSTANCE_MANAGER_COMPONENT)
    }

    pub fn runs_on(&self, node: &str) -> bool {
        self.node_name.as_deref() == Some(node)
    }
}

// =============================================================================
// Cluster API Port
// =============================================================================

/// Port for every cluster read and write the reconciler performs.
///
/// Calls are made one at a time and never retried here; timeouts belong to
/// the implementation.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List all Kubernetes nodes
    async fn list_cluster_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// Read one Kubernetes node
    async fn get_cluster_node(&self, name: &str) -> Result<ClusterNode>;

    /// List Longhorn nodes in the storage namespace
    async fn list_storage_nodes(&self) -> Result<Vec<StorageNode>>;

    /// Persist scheduling, eviction, and annotation changes on a Longhorn node
    async fn update_storage_node(&self, update: &EvictionUpdate) -> Result<()>;

    /// List Longhorn replicas in the storage namespace
    async fn list_replicas(&self) -> Result<Vec<StorageReplica>>;

    /// List instance-manager pods in the storage namespace.
    ///
    /// Implementations may pre-filter by label; callers still check
    /// [`InstanceManagerPod::is_instance_manager`].
    async fn list_instance_manager_pods(&self) -> Result<Vec<InstanceManagerPod>>;

    /// Delete a pod in the storage namespace. A pod that is already gone
    /// counts as deleted.
    async fn delete_pod(&self, name: &str) -> Result<()>;
}

pub type ClusterApiRef = Arc<dyn ClusterApi>;
