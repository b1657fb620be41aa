//! Reconciler configuration

use crate::domain::ports::{DEFAULT_LONGHORN_NAMESPACE, REBOOT_IN_PROGRESS_ANNOTATION};
use std::time::Duration;

/// How a pass reacts to a failed write against a single resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the pass on the first failure of any kind
    #[default]
    FailFast,
    /// Record failed patches and deletions and move on to the next
    /// resource; read and list failures still abort
    SkipFailedResource,
}

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Namespace holding Longhorn nodes, replicas, and instance managers
    pub namespace: String,
    /// Annotation shared with kured
    pub annotation_key: String,
    /// Sleep between passes
    pub poll_interval: Duration,
    /// Run a single pass and stop
    pub run_once: bool,
    /// Log planned actions without writing anything
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_LONGHORN_NAMESPACE.to_string(),
            annotation_key: REBOOT_IN_PROGRESS_ANNOTATION.to_string(),
            poll_interval: Duration::from_secs(60),
            run_once: false,
            dry_run: false,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}
