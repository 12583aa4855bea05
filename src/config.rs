use serde::Deserialize;
use std::time::Duration;

use crate::collector::CollectorConfig;
use crate::metrics_store::query::QueryLimits;
use crate::periodic::{Backoff, Schedule};
use crate::pruner::RetentionConfig;

/// Upper bound for `retention.retention_days` (100 years).
const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub collector: CollectorSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub query: QuerySection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Run VACUUM after every delete that removed rows.
    #[serde(default = "default_true")]
    pub vacuum_after_delete: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubernetesConfig {
    /// Path to a kubeconfig file; when unset the default client chain is used.
    pub kubeconfig: Option<String>,
    /// Namespace to sample; empty samples every namespace.
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_secs: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            fetch_timeout_secs: 10,
            backoff_initial_ms: 1000,
            backoff_max_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub interval_secs: u64,
    pub retention_days: u32,
    /// Optional cron expression (local time, seconds field first, e.g. "0 0 * * * *").
    /// Replaces `interval_secs` when set.
    pub schedule: Option<String>,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            retention_days: 7,
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    pub all_pods_max_span_hours: u32,
    pub single_pod_max_span_hours: u32,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            all_pods_max_span_hours: 4,
            single_pod_max_span_hours: 72,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.collector.interval_secs > 0,
            "collector.interval_secs must be > 0, got {}",
            self.collector.interval_secs
        );
        anyhow::ensure!(
            self.collector.fetch_timeout_secs > 0,
            "collector.fetch_timeout_secs must be > 0, got {}",
            self.collector.fetch_timeout_secs
        );
        anyhow::ensure!(
            self.collector.backoff_initial_ms > 0,
            "collector.backoff_initial_ms must be > 0, got {}",
            self.collector.backoff_initial_ms
        );
        anyhow::ensure!(
            self.collector.backoff_max_secs.saturating_mul(1000) >= self.collector.backoff_initial_ms,
            "collector.backoff_max_secs must cover collector.backoff_initial_ms"
        );
        anyhow::ensure!(
            self.retention.interval_secs > 0,
            "retention.interval_secs must be > 0, got {}",
            self.retention.interval_secs
        );
        anyhow::ensure!(
            (1..=MAX_RETENTION_DAYS).contains(&self.retention.retention_days),
            "retention.retention_days must be between 1 and {}, got {}",
            MAX_RETENTION_DAYS,
            self.retention.retention_days
        );
        if let Some(expr) = &self.retention.schedule {
            Schedule::cron(expr).map_err(|e| anyhow::anyhow!("retention.schedule: {}", e))?;
        }
        anyhow::ensure!(
            self.query.all_pods_max_span_hours > 0,
            "query.all_pods_max_span_hours must be > 0, got {}",
            self.query.all_pods_max_span_hours
        );
        anyhow::ensure!(
            self.query.single_pod_max_span_hours > 0,
            "query.single_pod_max_span_hours must be > 0, got {}",
            self.query.single_pod_max_span_hours
        );
        Ok(())
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_secs(self.collector.interval_secs),
            fetch_timeout: Duration::from_secs(self.collector.fetch_timeout_secs),
            namespace: self.kubernetes.namespace.clone(),
            backoff: self.backoff(),
        }
    }

    /// Retention settings; the cron expression was checked in `validate`.
    pub fn retention_config(&self) -> anyhow::Result<RetentionConfig> {
        let schedule = match &self.retention.schedule {
            Some(expr) => Schedule::cron(expr)?,
            None => Schedule::every(Duration::from_secs(self.retention.interval_secs)),
        };
        Ok(RetentionConfig {
            horizon: chrono::TimeDelta::days(self.retention.retention_days as i64),
            schedule,
            backoff: self.backoff(),
        })
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            all_pods_max_span: chrono::TimeDelta::hours(self.query.all_pods_max_span_hours as i64),
            single_pod_max_span: chrono::TimeDelta::hours(
                self.query.single_pod_max_span_hours as i64,
            ),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.collector.backoff_initial_ms),
            max: Duration::from_secs(self.collector.backoff_max_secs),
        }
    }
}
