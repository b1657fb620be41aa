//! Reconciler metrics
//!
//! Metrics live in a registry owned by [`ReconcileMetrics`] rather than the
//! process-wide default, so each reconciler (and each test) gets its own.

use crate::error::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Counters and gauges updated by reconciliation passes
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    pub passes: IntCounterVec,
    pub evictions_requested: IntCounter,
    pub evictions_rolled_back: IntCounter,
    pub instance_managers_deleted: IntCounter,
    pub resource_failures: IntCounterVec,
    pub nodes_pending_reboot: IntGauge,
    pub pass_duration: Histogram,
}

impl ReconcileMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes = IntCounterVec::new(
            Opts::new("kuredhorn_passes_total", "Reconciliation passes by result"),
            &["result"],
        )?;
        let evictions_requested = IntCounter::new(
            "kuredhorn_evictions_requested_total",
            "Longhorn nodes switched to eviction",
        )?;
        let evictions_rolled_back = IntCounter::new(
            "kuredhorn_evictions_rolled_back_total",
            "Longhorn nodes returned to scheduling after reboot",
        )?;
        let instance_managers_deleted = IntCounter::new(
            "kuredhorn_instance_managers_deleted_total",
            "Instance-manager pods deleted from drained nodes",
        )?;
        let resource_failures = IntCounterVec::new(
            Opts::new(
                "kuredhorn_resource_failures_total",
                "Writes that failed against a single resource",
            ),
            &["step"],
        )?;
        let nodes_pending_reboot = IntGauge::new(
            "kuredhorn_nodes_pending_reboot",
            "Nodes annotated by kured and cordoned in the last pass",
        )?;
        let pass_duration = Histogram::with_opts(HistogramOpts::new(
            "kuredhorn_pass_duration_seconds",
            "Duration of reconciliation passes",
        ))?;

        registry.register(Box::new(passes.clone()))?;
        registry.register(Box::new(evictions_requested.clone()))?;
        registry.register(Box::new(evictions_rolled_back.clone()))?;
        registry.register(Box::new(instance_managers_deleted.clone()))?;
        registry.register(Box::new(resource_failures.clone()))?;
        registry.register(Box::new(nodes_pending_reboot.clone()))?;
        registry.register(Box::new(pass_duration.clone()))?;

        Ok(Self {
            registry,
            passes,
            evictions_requested,
            evictions_rolled_back,
            instance_managers_deleted,
            resource_failures,
            nodes_pending_reboot,
            pass_duration,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
