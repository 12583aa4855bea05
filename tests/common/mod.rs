// Shared test helpers: temp stores, snapshot builders, fake metrics sources
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use podwatch::error::MetricsError;
use podwatch::metrics_source::MetricsSource;
use podwatch::metrics_store::MetricsStore;
use podwatch::models::{ContainerSample, NewClusterSnapshot, PodSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Fresh, initialised store in a temp dir. Keep the `TempDir` alive for the test's duration.
pub async fn temp_store() -> (TempDir, Arc<MetricsStore>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.db");
    let store = MetricsStore::connect(path.to_str().unwrap(), 4)
        .await
        .unwrap()
        .with_vacuum_after_delete(false);
    store.init().await.unwrap();
    (dir, Arc::new(store))
}

pub fn db_path(dir: &TempDir) -> String {
    dir.path().join("metrics.db").to_str().unwrap().to_string()
}

/// 2024-01-01T00:00:00Z plus `minutes`.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::TimeDelta::minutes(minutes)
}

pub fn container(name: &str, cpu: i64, mem: i64) -> ContainerSample {
    ContainerSample {
        name: name.into(),
        cpu_millicores: cpu,
        memory_bytes: mem,
    }
}

pub fn pod(name: &str, containers: Vec<ContainerSample>) -> PodSample {
    PodSample {
        name: name.into(),
        containers,
    }
}

pub fn snapshot(created_at: DateTime<Utc>, pods: Vec<PodSample>) -> NewClusterSnapshot {
    NewClusterSnapshot { created_at, pods }
}

/// `pods` pods named pod-0.., each with `containers` containers named c-0..
pub fn grid_snapshot(created_at: DateTime<Utc>, pods: usize, containers: usize) -> NewClusterSnapshot {
    let pods = (0..pods)
        .map(|p| {
            pod(
                &format!("pod-{}", p),
                (0..containers)
                    .map(|c| container(&format!("c-{}", c), (p * 10 + c) as i64, 1024 * (c as i64 + 1)))
                    .collect(),
            )
        })
        .collect();
    snapshot(created_at, pods)
}

/// Always returns the same pods.
pub struct StaticSource {
    pub pods: Vec<PodSample>,
    pub calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(pods: Vec<PodSample>) -> Arc<Self> {
        Arc::new(Self {
            pods,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MetricsSource for StaticSource {
    async fn fetch(&self, _namespace: &str) -> Result<Vec<PodSample>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.clone())
    }
}

/// Fails while `failing` is set, then returns a single pod.
pub struct FlakySource {
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

impl FlakySource {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetricsSource for FlakySource {
    async fn fetch(&self, _namespace: &str) -> Result<Vec<PodSample>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MetricsError::SourceUnavailable("metrics API down".into()));
        }
        Ok(vec![pod("web", vec![container("nginx", 5, 2048)])])
    }
}

/// Sleeps before answering; used to trip the fetch timeout.
pub struct SlowSource {
    pub delay: Duration,
}

#[async_trait]
impl MetricsSource for SlowSource {
    async fn fetch(&self, _namespace: &str) -> Result<Vec<PodSample>, MetricsError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![pod("slow", vec![])])
    }
}

/// Poll `check` every 10ms for up to 5s.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
