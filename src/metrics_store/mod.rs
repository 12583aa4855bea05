// SQLite metrics history: cluster_snapshot -> pod_snapshot -> container_snapshot.
// Uses sqlx for async + connection pooling. Timestamps are INTEGER unix millis (UTC).
// Trees are written and deleted in one transaction; reads run in one read transaction.

pub mod query;

use crate::error::MetricsError;
use crate::models::{
    ClusterSnapshot, ContainerSnapshot, NewClusterSnapshot, PodFilter, PodSnapshot, TimeWindow,
};
use chrono::{DateTime, Utc};
use query::{ClusterPredicate, QueryLimits};
use serde::Serialize;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::instrument;

/// Rows removed per table by one delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub clusters: u64,
    pub pods: u64,
    pub containers: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub clusters: i64,
    pub pods: i64,
    pub containers: i64,
}

pub struct MetricsStore {
    pool: SqlitePool,
    limits: QueryLimits,
    vacuum_after_delete: bool,
    // Serializes inserts, deletes and VACUUM across the collector, the pruner and HTTP callers.
    write_lock: Mutex<()>,
}

impl MetricsStore {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            limits: QueryLimits::default(),
            vacuum_after_delete: true,
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_query_limits(mut self, limits: QueryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether a successful delete is followed by VACUUM (best-effort).
    pub fn with_vacuum_after_delete(mut self, enabled: bool) -> Self {
        self.vacuum_after_delete = enabled;
        self
    }

    pub fn query_limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cluster_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pod_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER,
                name TEXT NOT NULL,
                cluster_snapshot_id INTEGER NOT NULL
                    REFERENCES cluster_snapshot(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS container_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER,
                name TEXT NOT NULL,
                cpu_usage INTEGER NOT NULL,
                memory_usage INTEGER NOT NULL,
                pod_snapshot_id INTEGER NOT NULL
                    REFERENCES pod_snapshot(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cluster_snapshot_created_at ON cluster_snapshot(created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pod_snapshot_cluster ON pod_snapshot(cluster_snapshot_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_container_snapshot_pod ON container_snapshot(pod_snapshot_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write a cluster snapshot and its whole subtree atomically. Returns the new cluster id.
    #[instrument(skip(self, snapshot), fields(repo = "metrics", operation = "insert", pods_count = snapshot.pods.len()))]
    pub async fn insert(&self, snapshot: &NewClusterSnapshot) -> Result<i64, MetricsError> {
        let ts = snapshot.created_at.timestamp_millis();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let cluster_id =
            sqlx::query("INSERT INTO cluster_snapshot (created_at, updated_at) VALUES ($1, $2)")
                .bind(ts)
                .bind(ts)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

        for pod in &snapshot.pods {
            let pod_id = sqlx::query(
                "INSERT INTO pod_snapshot (created_at, updated_at, name, cluster_snapshot_id) VALUES ($1, $2, $3, $4)",
            )
            .bind(ts)
            .bind(ts)
            .bind(&pod.name)
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for c in &pod.containers {
                sqlx::query(
                    "INSERT INTO container_snapshot (created_at, updated_at, name, cpu_usage, memory_usage, pod_snapshot_id) VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(ts)
                .bind(ts)
                .bind(&c.name)
                .bind(c.cpu_millicores)
                .bind(c.memory_bytes)
                .bind(pod_id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(cluster_id)
    }

    /// Without bounds: the latest snapshot. With bounds: every snapshot in `[start, end]`,
    /// ascending. Pods are filtered by `filter`; an unmatched filter leaves pod lists empty.
    #[instrument(skip(self), fields(repo = "metrics", operation = "query"))]
    pub async fn query(
        &self,
        window: &TimeWindow,
        filter: &PodFilter,
    ) -> Result<Vec<ClusterSnapshot>, MetricsError> {
        let plan = query::plan_query(window, filter, &self.limits)?;
        let mut tx = self.pool.begin().await?;

        let latest_id = match plan {
            query::QueryPlan::Latest => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM cluster_snapshot ORDER BY created_at DESC, id DESC LIMIT 1",
                )
                .fetch_optional(&mut *tx)
                .await?
            }
            query::QueryPlan::Range { .. } => None,
        };
        let Some(predicate) = ClusterPredicate::for_plan(plan, latest_id) else {
            return Ok(Vec::new());
        };

        let out = load_tree(&mut *tx, &predicate, filter).await?;
        tx.commit().await?;
        Ok(out)
    }

    /// Hard-delete every cluster snapshot (and subtree) whose created_at satisfies the given
    /// bounds. No bounds deletes everything. All three tables change together or not at all.
    #[instrument(skip(self), fields(repo = "metrics", operation = "delete"))]
    pub async fn delete(&self, window: &TimeWindow) -> Result<DeleteSummary, MetricsError> {
        query::validate_delete(window)?;
        let predicate = ClusterPredicate::for_delete(window);

        let summary = {
            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;

            let containers_sql = format!(
                "DELETE FROM container_snapshot WHERE pod_snapshot_id IN (
                    SELECT p.id FROM pod_snapshot p
                    JOIN cluster_snapshot c ON c.id = p.cluster_snapshot_id
                    WHERE {})",
                predicate.sql
            );
            let containers = bind_predicate(&containers_sql, &predicate, None)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            let pods_sql = format!(
                "DELETE FROM pod_snapshot WHERE cluster_snapshot_id IN (
                    SELECT c.id FROM cluster_snapshot c WHERE {})",
                predicate.sql
            );
            let pods = bind_predicate(&pods_sql, &predicate, None)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            let clusters_sql = format!(
                "DELETE FROM cluster_snapshot WHERE id IN (
                    SELECT c.id FROM cluster_snapshot c WHERE {})",
                predicate.sql
            );
            let clusters = bind_predicate(&clusters_sql, &predicate, None)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            tx.commit().await?;
            DeleteSummary {
                clusters,
                pods,
                containers,
            }
        };

        if self.vacuum_after_delete
            && summary.clusters > 0
            && let Err(e) = self.vacuum().await
        {
            tracing::warn!(error = %e, operation = "vacuum", "VACUUM after delete failed");
        }
        Ok(summary)
    }

    /// Reclaim space after deletes.
    #[instrument(skip(self), fields(repo = "metrics", operation = "vacuum"))]
    pub async fn vacuum(&self) -> Result<(), MetricsError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn row_counts(&self) -> Result<RowCounts, MetricsError> {
        let mut tx = self.pool.begin().await?;
        let clusters = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cluster_snapshot")
            .fetch_one(&mut *tx)
            .await?;
        let pods = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pod_snapshot")
            .fetch_one(&mut *tx)
            .await?;
        let containers = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM container_snapshot")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(RowCounts {
            clusters,
            pods,
            containers,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_predicate<'q>(
    sql: &'q str,
    predicate: &ClusterPredicate,
    pod_name: Option<&'q str>,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    let mut q = sqlx::query(sql);
    for b in &predicate.binds {
        q = q.bind(*b);
    }
    if let Some(name) = pod_name {
        q = q.bind(name);
    }
    q
}

/// Load clusters matching `predicate`, then their (filtered) pods, then those pods' containers.
async fn load_tree(
    conn: &mut SqliteConnection,
    predicate: &ClusterPredicate,
    filter: &PodFilter,
) -> Result<Vec<ClusterSnapshot>, MetricsError> {
    let pod_name = match filter {
        PodFilter::All => None,
        PodFilter::Named(name) => Some(name.as_str()),
    };
    let name_clause = if pod_name.is_some() {
        " AND p.name = ?"
    } else {
        ""
    };

    let clusters_sql = format!(
        "SELECT c.id, c.created_at FROM cluster_snapshot c WHERE {} ORDER BY c.created_at ASC, c.id ASC",
        predicate.sql
    );
    let cluster_rows = bind_predicate(&clusters_sql, predicate, None)
        .fetch_all(&mut *conn)
        .await?;

    let mut out = Vec::with_capacity(cluster_rows.len());
    let mut cluster_index: HashMap<i64, usize> = HashMap::with_capacity(cluster_rows.len());
    for row in cluster_rows {
        let id: i64 = row.try_get("id")?;
        let created_at: i64 = row.try_get("created_at")?;
        cluster_index.insert(id, out.len());
        out.push(ClusterSnapshot {
            id,
            created_at: millis_to_utc(created_at),
            pods: Vec::new(),
        });
    }
    if out.is_empty() {
        return Ok(out);
    }

    let pods_sql = format!(
        "SELECT p.id, p.name, p.cluster_snapshot_id FROM pod_snapshot p
         JOIN cluster_snapshot c ON c.id = p.cluster_snapshot_id
         WHERE {}{} ORDER BY p.id ASC",
        predicate.sql, name_clause
    );
    let pod_rows = bind_predicate(&pods_sql, predicate, pod_name)
        .fetch_all(&mut *conn)
        .await?;

    // pod id -> (cluster position, pod position)
    let mut pod_index: HashMap<i64, (usize, usize)> = HashMap::with_capacity(pod_rows.len());
    for row in pod_rows {
        let id: i64 = row.try_get("id")?;
        let name: String = row.try_get("name")?;
        let cluster_id: i64 = row.try_get("cluster_snapshot_id")?;
        let Some(&ci) = cluster_index.get(&cluster_id) else {
            continue;
        };
        let pods = &mut out[ci].pods;
        pod_index.insert(id, (ci, pods.len()));
        pods.push(PodSnapshot {
            id,
            name,
            containers: Vec::new(),
        });
    }
    if pod_index.is_empty() {
        return Ok(out);
    }

    let containers_sql = format!(
        "SELECT k.id, k.name, k.cpu_usage, k.memory_usage, k.pod_snapshot_id FROM container_snapshot k
         JOIN pod_snapshot p ON p.id = k.pod_snapshot_id
         JOIN cluster_snapshot c ON c.id = p.cluster_snapshot_id
         WHERE {}{} ORDER BY k.id ASC",
        predicate.sql, name_clause
    );
    let container_rows = bind_predicate(&containers_sql, predicate, pod_name)
        .fetch_all(&mut *conn)
        .await?;
    for row in container_rows {
        let pod_id: i64 = row.try_get("pod_snapshot_id")?;
        let Some(&(ci, pi)) = pod_index.get(&pod_id) else {
            continue;
        };
        out[ci].pods[pi].containers.push(ContainerSnapshot {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            cpu_usage: row.try_get("cpu_usage")?,
            memory_usage: row.try_get("memory_usage")?,
        });
    }

    Ok(out)
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(|| {
        tracing::debug!(created_at = ms, "created_at out of range, using epoch");
        DateTime::<Utc>::default()
    })
}
