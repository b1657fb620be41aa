//! Reconciler - kured/Longhorn coordination
//!
//! Every pass recomputes all decisions from the cluster as it is now:
//!
//! 1. [`scanner`]: nodes kured annotated and cordoned
//! 2. [`coordinator`]: request Longhorn eviction on those nodes
//! 3. [`rollback`]: release Longhorn nodes whose node kured uncordoned
//! 4. [`reaper`]: delete instance managers on drained, empty nodes
//!
//! Nothing is kept between passes. The drain marker on the Longhorn node is
//! the only memory, so a pass interrupted at any point is finished by the
//! next one.

pub mod coordinator;
pub mod reaper;
pub mod rollback;
pub mod scanner;
pub mod state;

pub use state::{plan, Action, NodeState, Observation};

use crate::config::{FailurePolicy, ReconcilerConfig};
use crate::domain::ports::{ClusterApiRef, ClusterNode};
use crate::error::{Error, ErrorAction, Result};
use crate::metrics::ReconcileMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

// =============================================================================
// Context
// =============================================================================

/// Everything a step needs, handed over explicitly
#[derive(Clone)]
pub struct Context {
    pub api: ClusterApiRef,
    pub config: ReconcilerConfig,
    pub metrics: ReconcileMetrics,
}

impl Context {
    pub fn new(api: ClusterApiRef, config: ReconcilerConfig, metrics: ReconcileMetrics) -> Self {
        Self { api, config, metrics }
    }

    /// Decide whether a step may carry on after `err`.
    ///
    /// Returns the error when the pass has to stop; otherwise records the
    /// failure in `report`.
    pub(crate) fn absorb(&self, step: &str, err: Error, report: &mut PassReport) -> Result<()> {
        match (self.config.failure_policy, err.action()) {
            (FailurePolicy::SkipFailedResource, ErrorAction::SkipResource) => {
                warn!("Skipping failed resource in step {}: {}", step, err);
                self.metrics.resource_failures.with_label_values(&[step]).inc();
                report.failures.push(ResourceFailure {
                    step: step.to_string(),
                    resource: resource_name(&err),
                    error: err.to_string(),
                });
                Ok(())
            }
            _ => {
                self.metrics.resource_failures.with_label_values(&[step]).inc();
                Err(err)
            }
        }
    }
}

fn resource_name(err: &Error) -> String {
    match err {
        Error::ResourceOperationFailed { name, .. } | Error::ResourceNotFound { name, .. } => {
            name.clone()
        }
        _ => String::new(),
    }
}

// =============================================================================
// Pass Report
// =============================================================================

/// A write that failed and was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub step: String,
    pub resource: String,
    pub error: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    /// Nothing was written; the lists below are what would have been done
    pub dry_run: bool,
    pub pending_reboot: Vec<String>,
    pub evictions_requested: Vec<String>,
    pub rolled_back: Vec<String>,
    pub pods_deleted: Vec<String>,
    pub failures: Vec<ResourceFailure>,
}

impl Default for PassReport {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            dry_run: false,
            pending_reboot: Vec::new(),
            evictions_requested: Vec::new(),
            rolled_back: Vec::new(),
            pods_deleted: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl PassReport {
    pub fn is_noop(&self) -> bool {
        self.evictions_requested.is_empty()
            && self.rolled_back.is_empty()
            && self.pods_deleted.is_empty()
            && self.failures.is_empty()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives reconciliation passes
pub struct Reconciler {
    ctx: Context,
    passes: AtomicU64,
}

impl Reconciler {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            passes: AtomicU64::new(0),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run one pass: scan, request evictions, roll back, reap.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let n = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let timer = self.ctx.metrics.pass_duration.start_timer();

        let result = self.pass().instrument(info_span!("pass", n)).await;
        timer.observe_duration();

        let outcome = match &result {
            Ok(report) if !report.failures.is_empty() => "partial",
            Ok(_) => "success",
            Err(_) => "failed",
        };
        self.ctx.metrics.passes.with_label_values(&[outcome]).inc();

        result
    }

    async fn pass(&self) -> Result<PassReport> {
        let mut report = PassReport {
            dry_run: self.ctx.config.dry_run,
            ..Default::default()
        };

        if self.ctx.config.dry_run {
            self.preview(&mut report).await?;
            return Ok(report);
        }

        let key = self.ctx.config.annotation_key.as_str();
        let cluster_nodes = self.ctx.api.list_cluster_nodes().await?;
        let candidates = scanner::nodes_pending_reboot(&cluster_nodes, key);
        self.record_candidates(&candidates, &mut report);

        coordinator::request_evictions(&self.ctx, &candidates, &mut report).await?;
        rollback::release_rebooted_nodes(&self.ctx, &mut report).await?;
        reaper::reap_instance_managers(&self.ctx, &mut report).await?;

        Ok(report)
    }

    fn record_candidates(&self, candidates: &[&ClusterNode], report: &mut PassReport) {
        report.pending_reboot = candidates.iter().map(|n| n.name.clone()).collect();
        self.ctx
            .metrics
            .nodes_pending_reboot
            .set(candidates.len() as i64);
        info!("Nodes with annotation: {:?}", report.pending_reboot);
    }

    /// Work out what a pass would do without writing anything.
    async fn preview(&self, report: &mut PassReport) -> Result<()> {
        let key = self.ctx.config.annotation_key.as_str();

        let cluster_nodes = self.ctx.api.list_cluster_nodes().await?;
        let candidates = scanner::nodes_pending_reboot(&cluster_nodes, key);
        self.record_candidates(&candidates, report);

        let pending: BTreeSet<&str> = candidates.iter().map(|n| n.name.as_str()).collect();
        let by_name: BTreeMap<&str, &ClusterNode> =
            cluster_nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        let storage_nodes = self.ctx.api.list_storage_nodes().await?;
        let replicas = self.ctx.api.list_replicas().await?;
        let counts = reaper::replicas_by_node(&replicas);
        let pods = self.ctx.api.list_instance_manager_pods().await?;

        for node in &storage_nodes {
            let replicas_on_node = counts.get(node.name.as_str()).copied().unwrap_or(0);
            let state = NodeState::observe(node, key, replicas_on_node);

            let cordoned = match by_name.get(node.name.as_str()) {
                Some(cluster_node) => cluster_node.unschedulable,
                None if state.is_marked() => {
                    return Err(Error::ResourceNotFound {
                        kind: "Node".into(),
                        name: node.name.clone(),
                    })
                }
                None => false,
            };

            let observation = Observation {
                reboot_pending: pending.contains(node.name.as_str()),
                cordoned,
                replicas_on_node,
            };

            for action in plan(state, &observation) {
                info!("[dry-run] Would {} on node {} ({})", action, node.name, state);
                match action {
                    Action::RequestEviction => report.evictions_requested.push(node.name.clone()),
                    Action::RollBack => report.rolled_back.push(node.name.clone()),
                    Action::ReapInstanceManager => report.pods_deleted.extend(
                        pods.iter()
                            .filter(|pod| pod.is_instance_manager() && pod.runs_on(&node.name))
                            .map(|pod| pod.name.clone()),
                    ),
                }
            }
        }

        Ok(())
    }

    /// Run passes until `shutdown` fires, or once in single-pass mode.
    ///
    /// A failed pass ends the loop with its error.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            match self.run_pass().await {
                Ok(report) => {
                    if !report.is_noop() {
                        info!(
                            "Pass complete: {} evictions requested, {} rolled back, {} pods deleted, {} failures",
                            report.evictions_requested.len(),
                            report.rolled_back.len(),
                            report.pods_deleted.len(),
                            report.failures.len()
                        );
                    }
                }
                Err(e) => {
                    error!(
                        transient = e.is_transient(),
                        "An error occurred: {}", e
                    );
                    return Err(e);
                }
            }

            if self.ctx.config.run_once {
                info!("Exiting as testing is enabled");
                return Ok(());
            }

            info!(
                "Sleeping for {} seconds",
                self.ctx.config.poll_interval.as_secs()
            );
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Exiting");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.ctx.config.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::domain::ports::{
        InstanceManagerPod, StorageNode, StorageReplica, REBOOT_IN_PROGRESS_ANNOTATION as KEY,
    };
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) fn context(cluster: Arc<InMemoryCluster>, config: ReconcilerConfig) -> Context {
        Context::new(cluster, config, ReconcileMetrics::new().unwrap())
    }

    fn reconciler(cluster: Arc<InMemoryCluster>, config: ReconcilerConfig) -> Reconciler {
        Reconciler::new(context(cluster, config))
    }

    /// Worker `w1` with one replica and its instance manager, not yet
    /// touched by kured
    fn worker() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_cluster_node(ClusterNode::new("w1"));
        cluster.put_cluster_node(ClusterNode::new("w2"));
        cluster.put_storage_node(StorageNode::new("w1"));
        cluster.put_storage_node(StorageNode::new("w2"));
        cluster.put_replica(StorageReplica::new("pvc-a-r-1", "w1"));
        cluster.put_replica(StorageReplica::new("pvc-a-r-2", "w2"));
        cluster.put_pod(InstanceManagerPod::new("instance-manager-w1", "w1"));
        cluster.put_pod(InstanceManagerPod::new("instance-manager-w2", "w2"));
        cluster
    }

    fn kured_cordons(cluster: &InMemoryCluster, node: &str) {
        cluster.put_cluster_node(
            ClusterNode::new(node)
                .with_annotation(KEY, "2026-10-18T10:00:00Z")
                .cordoned(),
        );
    }

    #[tokio::test]
    async fn test_reboot_cycle_end_to_end() {
        let cluster = worker();
        let reconciler = reconciler(cluster.clone(), ReconcilerConfig::default());

        // Pass 1: kured annotated and cordoned w1
        kured_cordons(&cluster, "w1");
        let report = reconciler.run_pass().await.unwrap();
        assert_eq!(report.pending_reboot, vec!["w1"]);
        assert_eq!(report.evictions_requested, vec!["w1"]);
        let w1 = cluster.storage_node("w1").unwrap();
        assert!(!w1.allow_scheduling);
        assert!(w1.eviction_requested);
        assert_eq!(w1.annotation(KEY), Some("true"));
        assert!(cluster.deleted_pods().is_empty());

        // Pass 2: still cordoned, replica still there
        cluster.clear_history();
        let report = reconciler.run_pass().await.unwrap();
        assert!(report.is_noop());
        assert!(cluster.updates().is_empty());
        assert!(cluster.deleted_pods().is_empty());

        // Pass 3: Longhorn moved the replica away
        cluster.remove_replica("pvc-a-r-1");
        let report = reconciler.run_pass().await.unwrap();
        assert_eq!(report.pods_deleted, vec!["instance-manager-w1"]);
        assert!(cluster.updates().is_empty());
        assert_eq!(cluster.pod_names(), vec!["instance-manager-w2"]);

        // Pass 4: kured uncordoned w1 after the reboot
        cluster.set_unschedulable("w1", false);
        let report = reconciler.run_pass().await.unwrap();
        assert_eq!(report.rolled_back, vec!["w1"]);
        let w1 = cluster.storage_node("w1").unwrap();
        assert!(w1.allow_scheduling);
        assert!(!w1.eviction_requested);
        assert_eq!(w1.annotation(KEY), Some("false"));

        // w2 was never involved
        assert_eq!(cluster.storage_node("w2").unwrap(), StorageNode::new("w2"));

        let metrics = &reconciler.context().metrics;
        assert_eq!(metrics.passes.with_label_values(&["success"]).get(), 4);
        assert_eq!(metrics.evictions_requested.get(), 1);
        assert_eq!(metrics.evictions_rolled_back.get(), 1);
        assert_eq!(metrics.instance_managers_deleted.get(), 1);
    }

    #[tokio::test]
    async fn test_rerun_after_abort_resumes() {
        let cluster = worker();
        kured_cordons(&cluster, "w1");
        cluster.remove_replica("pvc-a-r-1");
        cluster.fail_delete_pod("instance-manager-w1");
        let reconciler = reconciler(cluster.clone(), ReconcilerConfig::default());

        // Eviction is written, then the pass dies on the pod deletion
        assert!(reconciler.run_pass().await.is_err());
        assert_eq!(cluster.updates().len(), 1);
        assert_eq!(
            reconciler
                .context()
                .metrics
                .passes
                .with_label_values(&["failed"])
                .get(),
            1
        );

        cluster.clear_faults();
        let report = reconciler.run_pass().await.unwrap();
        assert!(report.evictions_requested.is_empty());
        assert_eq!(report.pods_deleted, vec!["instance-manager-w1"]);
        assert_eq!(cluster.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_policy_reports_partial_pass() {
        let cluster = worker();
        kured_cordons(&cluster, "w1");
        kured_cordons(&cluster, "w2");
        cluster.fail_update_storage_node("w1");
        let config = ReconcilerConfig {
            failure_policy: FailurePolicy::SkipFailedResource,
            ..Default::default()
        };
        let reconciler = reconciler(cluster.clone(), config);

        let report = reconciler.run_pass().await.unwrap();

        assert_eq!(report.evictions_requested, vec!["w2"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            reconciler
                .context()
                .metrics
                .passes
                .with_label_values(&["partial"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let cluster = worker();
        kured_cordons(&cluster, "w1");
        cluster.remove_replica("pvc-a-r-1");
        let config = ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        };
        let reconciler = reconciler(cluster.clone(), config);

        let report = reconciler.run_pass().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.evictions_requested, vec!["w1"]);
        assert_eq!(report.pods_deleted, vec!["instance-manager-w1"]);
        assert!(cluster.updates().is_empty());
        assert!(cluster.deleted_pods().is_empty());
        assert_eq!(cluster.storage_node("w1").unwrap(), StorageNode::new("w1"));
    }

    #[tokio::test]
    async fn test_dry_run_rollback_preview() {
        let cluster = worker();
        cluster.put_storage_node(StorageNode::new("w1").with_annotation(KEY, "true"));
        let config = ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        };
        let reconciler = reconciler(cluster.clone(), config);

        let report = reconciler.run_pass().await.unwrap();

        assert_eq!(report.rolled_back, vec!["w1"]);
        assert!(report.pods_deleted.is_empty());
        assert!(cluster.updates().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_missing_cluster_node() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.put_storage_node(StorageNode::new("gone").with_annotation(KEY, "true"));
        let config = ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        };
        let reconciler = reconciler(cluster, config);

        assert_matches!(
            reconciler.run_pass().await,
            Err(Error::ResourceNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_run_once_stops_after_one_pass() {
        let cluster = worker();
        kured_cordons(&cluster, "w1");
        let config = ReconcilerConfig {
            run_once: true,
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let reconciler = reconciler(cluster.clone(), config);

        reconciler.run(CancellationToken::new()).await.unwrap();

        assert_eq!(cluster.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let cluster = worker();
        let config = ReconcilerConfig {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let reconciler = reconciler(cluster, config);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        reconciler.run(shutdown).await.unwrap();

        assert_eq!(
            reconciler
                .context()
                .metrics
                .passes
                .with_label_values(&["success"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_run_propagates_pass_failure() {
        let cluster = worker();
        cluster.put_storage_node(StorageNode::new("w1").with_annotation(KEY, "true"));
        cluster.fail_get_cluster_node("w1");
        let reconciler = reconciler(cluster, ReconcilerConfig::default());

        let result = reconciler.run(CancellationToken::new()).await;

        assert_matches!(result, Err(Error::Internal(_)));
    }
}
