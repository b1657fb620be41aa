//! Per-node drain state
//!
//! Nothing here is stored between passes. A node's state is read back from
//! the drain marker on its Longhorn node plus the number of replicas still
//! placed on it, and [`plan`] maps that state and the kured side of the
//! picture to the actions one pass applies, in step order.

use crate::domain::ports::{StorageNode, ANNOTATION_FALSE, ANNOTATION_TRUE};
use serde::Serialize;
use std::fmt;

/// Where a node sits in the drain cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    /// No drain marker, or one we did not write
    Unmarked,
    /// Marked for eviction, replicas still on the node
    EvictionRequested,
    /// Marked for eviction with no replicas left; the instance manager may
    /// be recycled
    Reaped,
    /// Released after the reboot finished
    RolledBack,
}

impl NodeState {
    pub fn observe(node: &StorageNode, annotation_key: &str, replicas_on_node: usize) -> Self {
        match node.annotation(annotation_key) {
            Some(ANNOTATION_TRUE) => Self::marked(replicas_on_node),
            Some(ANNOTATION_FALSE) => NodeState::RolledBack,
            _ => NodeState::Unmarked,
        }
    }

    fn marked(replicas_on_node: usize) -> Self {
        if replicas_on_node > 0 {
            NodeState::EvictionRequested
        } else {
            NodeState::Reaped
        }
    }

    /// Whether the drain marker is set to `"true"`
    pub fn is_marked(self) -> bool {
        matches!(self, NodeState::EvictionRequested | NodeState::Reaped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Unmarked => write!(f, "Unmarked"),
            NodeState::EvictionRequested => write!(f, "EvictionRequested"),
            NodeState::Reaped => write!(f, "Reaped"),
            NodeState::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// What the cluster looks like for one node at the start of a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// kured annotated and cordoned the node
    pub reboot_pending: bool,
    /// The Kubernetes node is unschedulable
    pub cordoned: bool,
    pub replicas_on_node: usize,
}

/// A write the reconciler makes for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    RequestEviction,
    RollBack,
    ReapInstanceManager,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::RequestEviction => write!(f, "request eviction"),
            Action::RollBack => write!(f, "roll back eviction"),
            Action::ReapInstanceManager => write!(f, "delete instance manager"),
        }
    }
}

/// Actions a pass applies to a node, in the order the steps run.
pub fn plan(state: NodeState, observation: &Observation) -> Vec<Action> {
    let mut actions = Vec::new();
    let mut state = state;

    if observation.reboot_pending && !state.is_marked() {
        actions.push(Action::RequestEviction);
        state = NodeState::marked(observation.replicas_on_node);
    }

    if state.is_marked() && !observation.cordoned {
        actions.push(Action::RollBack);
        return actions;
    }

    if state == NodeState::Reaped {
        actions.push(Action::ReapInstanceManager);
    }

    actions
}
