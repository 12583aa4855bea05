// Retention pruner: hard-delete cluster snapshots older than the retention horizon.
// Runs on a fixed interval, or on a cron schedule (local time) when one is configured.

use crate::error::MetricsError;
use crate::metrics_store::{DeleteSummary, MetricsStore};
use crate::models::TimeWindow;
use crate::periodic::{self, Backoff, PeriodicJob, PeriodicTask, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Snapshots created at or before `now - horizon` are removed.
    pub horizon: TimeDelta,
    pub schedule: Schedule,
    pub backoff: Backoff,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            horizon: TimeDelta::days(7),
            schedule: Schedule::every(std::time::Duration::from_secs(3600)),
            backoff: Backoff::default(),
        }
    }
}

pub struct RetentionPruner {
    store: Arc<MetricsStore>,
    horizon: TimeDelta,
    clusters_pruned_total: Arc<AtomicU64>,
}

impl RetentionPruner {
    pub fn new(store: Arc<MetricsStore>, horizon: TimeDelta) -> Self {
        Self {
            store,
            horizon,
            clusters_pruned_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn pruned_counter(&self) -> Arc<AtomicU64> {
        self.clusters_pruned_total.clone()
    }

    /// `now - horizon`, clamped to the earliest representable time.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn prune_once(&self) -> Result<DeleteSummary, MetricsError> {
        self.prune_before(self.cutoff(Utc::now())).await
    }

    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<DeleteSummary, MetricsError> {
        let summary = self.store.delete(&TimeWindow::until(cutoff)).await?;
        self.clusters_pruned_total
            .fetch_add(summary.clusters, Ordering::Relaxed);
        if summary.clusters > 0 {
            info!(
                operation = "prune",
                cutoff = %cutoff.to_rfc3339(),
                clusters = summary.clusters,
                pods = summary.pods,
                containers = summary.containers,
                "Pruned old snapshots"
            );
        } else {
            debug!(operation = "prune", cutoff = %cutoff.to_rfc3339(), "Nothing to prune");
        }
        Ok(summary)
    }
}

#[async_trait]
impl PeriodicJob for RetentionPruner {
    fn name(&self) -> &'static str {
        "retention_pruner"
    }

    async fn run_tick(&mut self) -> Result<(), MetricsError> {
        self.prune_once().await.map(|_| ())
    }
}

/// Spawns the pruner. Returns its task handle and the pruned-clusters counter.
pub fn spawn(store: Arc<MetricsStore>, config: RetentionConfig) -> (PeriodicTask, Arc<AtomicU64>) {
    let pruner = RetentionPruner::new(store, config.horizon);
    let pruned = pruner.pruned_counter();
    let task = periodic::spawn(pruner, config.schedule, config.backoff);
    (task, pruned)
}
