// Where per-container usage samples come from.

mod kube_source;
pub mod quantity;

pub use kube_source::KubeMetricsSource;

use crate::error::MetricsError;
use crate::models::PodSample;
use async_trait::async_trait;

/// Current per-pod, per-container usage for a namespace ("" = all namespaces).
/// Implementations return `MetricsError::SourceUnavailable` when the API cannot be reached.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, namespace: &str) -> Result<Vec<PodSample>, MetricsError>;
}
