// PodMetrics from the Kubernetes metrics API (metrics.k8s.io/v1beta1) via the kube client.

use super::MetricsSource;
use super::quantity;
use crate::error::MetricsError;
use crate::models::{ContainerSample, PodSample};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{instrument, warn};

const METRICS_API: &str = "/apis/metrics.k8s.io/v1beta1";

#[derive(Debug, Deserialize)]
struct PodMetricsList {
    #[serde(default)]
    items: Vec<PodMetrics>,
}

#[derive(Debug, Deserialize)]
struct PodMetrics {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    name: String,
    #[serde(default)]
    usage: BTreeMap<String, Quantity>,
}

pub struct KubeMetricsSource {
    client: Client,
}

impl KubeMetricsSource {
    /// Connect with an explicit kubeconfig file, or the default chain (env, ~/.kube/config, in-cluster).
    pub async fn connect(kubeconfig: Option<&Path>) -> anyhow::Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for KubeMetricsSource {
    #[instrument(skip(self), fields(source = "kube", operation = "fetch"))]
    async fn fetch(&self, namespace: &str) -> Result<Vec<PodSample>, MetricsError> {
        let url = if namespace.is_empty() {
            format!("{}/pods", METRICS_API)
        } else {
            format!("{}/namespaces/{}/pods", METRICS_API, namespace)
        };
        let request = http::Request::get(url)
            .body(Vec::new())
            .map_err(|e| MetricsError::SourceUnavailable(format!("build request: {}", e)))?;
        let list: PodMetricsList = self
            .client
            .request(request)
            .await
            .map_err(|e| MetricsError::SourceUnavailable(e.to_string()))?;
        Ok(list.items.into_iter().map(pod_sample).collect())
    }
}

fn pod_sample(pod: PodMetrics) -> PodSample {
    let name = pod.metadata.name.unwrap_or_default();
    let containers = pod
        .containers
        .into_iter()
        .map(|c| ContainerSample {
            cpu_millicores: usage_value(&name, &c, "cpu", quantity::cpu_millicores),
            memory_bytes: usage_value(&name, &c, "memory", quantity::memory_bytes),
            name: c.name,
        })
        .collect();
    PodSample { name, containers }
}

/// Missing resources count as zero; unparseable ones are logged and count as zero.
fn usage_value(
    pod: &str,
    container: &ContainerMetrics,
    resource: &str,
    convert: fn(&str) -> Option<i64>,
) -> i64 {
    let Some(q) = container.usage.get(resource) else {
        return 0;
    };
    convert(&q.0).unwrap_or_else(|| {
        warn!(
            pod,
            container = %container.name,
            resource,
            quantity = %q.0,
            "unparseable resource quantity, recording 0"
        );
        0
    })
}
