// Snapshot tree: cluster -> pods -> containers.
// Read side carries row ids; write side (samples) is what the metrics source produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One collection cycle as stored. `created_at` is the sampling time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub pods: Vec<PodSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub id: i64,
    pub name: String,
    pub containers: Vec<ContainerSnapshot>,
}

/// Per-container usage: CPU in millicores, memory in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: i64,
    pub name: String,
    pub cpu_usage: i64,
    pub memory_usage: i64,
}

/// A snapshot tree that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClusterSnapshot {
    pub created_at: DateTime<Utc>,
    pub pods: Vec<PodSample>,
}

impl NewClusterSnapshot {
    pub fn container_count(&self) -> usize {
        self.pods.iter().map(|p| p.containers.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSample {
    pub name: String,
    pub containers: Vec<ContainerSample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub name: String,
    pub cpu_millicores: i64,
    pub memory_bytes: i64,
}
