//! kuredhorn - kured/Longhorn reboot coordination
//!
//! kured cordons and annotates a node before rebooting it. Longhorn keeps
//! replicas on that node until told to move them. This crate bridges the
//! two through kured's `weave.works/kured-reboot-in-progress` annotation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Reconciliation Pass                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Kubernetes nodes ──► Scanner (annotated + cordoned)              │
//! │                           │                                       │
//! │                           ▼                                       │
//! │  Longhorn nodes   ──► Coordinator (allowScheduling=false,         │
//! │                                    evictionRequested=true)        │
//! │                           │                                       │
//! │                           ▼                                       │
//! │  Kubernetes node  ──► Rollback (uncordoned → release)             │
//! │                           │                                       │
//! │                           ▼                                       │
//! │  Replicas + pods  ──► Reaper (no replicas → delete instance mgr)  │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                ClusterApi port (kube-rs / in-memory)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconciler`]: Scanner, coordinator, rollback, reaper, and the pass driver
//! - [`cluster`]: `ClusterApi` adapters
//! - [`crd`]: Longhorn custom resources
//! - [`domain`]: Core types and the `ClusterApi` port
//! - [`config`]: Reconciler configuration
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod cluster;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod reconciler;

// Re-export commonly used types
pub use cluster::{ConnectionMode, InMemoryCluster, KubeCluster};

pub use config::{FailurePolicy, ReconcilerConfig};

pub use crd::{LonghornNode, LonghornNodeSpec, LonghornReplica, LonghornReplicaSpec};

pub use domain::ports::{
    ClusterApi, ClusterApiRef, ClusterNode, EvictionUpdate, InstanceManagerPod, StorageNode,
    StorageReplica, DEFAULT_LONGHORN_NAMESPACE, REBOOT_IN_PROGRESS_ANNOTATION,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::ReconcileMetrics;

pub use reconciler::{Action, Context, NodeState, Observation, PassReport, Reconciler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
