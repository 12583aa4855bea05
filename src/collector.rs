// Snapshot collector: every tick, fetch usage for all pods and persist it as one cluster snapshot.
// A failed or timed-out fetch persists nothing; the next tick proceeds as usual.

use crate::error::MetricsError;
use crate::metrics_source::MetricsSource;
use crate::metrics_store::MetricsStore;
use crate::models::NewClusterSnapshot;
use crate::periodic::{self, Backoff, PeriodicJob, PeriodicTask, Schedule};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Duration;

/// Collector timing and scope.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    /// Namespace to sample; empty means all namespaces.
    pub namespace: String,
    pub backoff: Backoff,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            namespace: String::new(),
            backoff: Backoff::default(),
        }
    }
}

pub struct SnapshotCollector {
    source: Arc<dyn MetricsSource>,
    store: Arc<MetricsStore>,
    namespace: String,
    fetch_timeout: Duration,
    snapshots_saved_total: Arc<AtomicU64>,
}

impl SnapshotCollector {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        store: Arc<MetricsStore>,
        config: &CollectorConfig,
    ) -> Self {
        Self {
            source,
            store,
            namespace: config.namespace.clone(),
            fetch_timeout: config.fetch_timeout,
            snapshots_saved_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of snapshots persisted by this collector.
    pub fn saved_counter(&self) -> Arc<AtomicU64> {
        self.snapshots_saved_total.clone()
    }

    /// One collection cycle. Returns the new cluster snapshot id.
    pub async fn collect_once(&self) -> Result<i64, MetricsError> {
        let created_at = Utc::now();
        let pods =
            match tokio::time::timeout(self.fetch_timeout, self.source.fetch(&self.namespace))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(MetricsError::SourceUnavailable(format!(
                        "fetch timed out after {}ms",
                        self.fetch_timeout.as_millis()
                    )));
                }
            };

        let snapshot = NewClusterSnapshot { created_at, pods };
        let id = self.store.insert(&snapshot).await?;
        self.snapshots_saved_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            operation = "collect",
            cluster_snapshot_id = id,
            pods_count = snapshot.pods.len(),
            containers_count = snapshot.container_count(),
            "Snapshot saved"
        );
        Ok(id)
    }
}

#[async_trait]
impl PeriodicJob for SnapshotCollector {
    fn name(&self) -> &'static str {
        "snapshot_collector"
    }

    async fn run_tick(&mut self) -> Result<(), MetricsError> {
        self.collect_once().await.map(|_| ())
    }
}

/// Spawns the collector on a fixed interval. Returns the collector's task handle and saved counter.
pub fn spawn(
    source: Arc<dyn MetricsSource>,
    store: Arc<MetricsStore>,
    config: CollectorConfig,
) -> (PeriodicTask, Arc<AtomicU64>) {
    let collector = SnapshotCollector::new(source, store, &config);
    let saved = collector.saved_counter();
    let task = periodic::spawn(collector, Schedule::every(config.interval), config.backoff);
    (task, saved)
}
