// MetricsStore tests: insert, query windows and filters, span caps, atomic delete

mod common;

use chrono::TimeDelta;
use common::*;
use podwatch::error::{MetricsError, ValidationError};
use podwatch::metrics_store::{DeleteSummary, MetricsStore, RowCounts};
use podwatch::metrics_store::query::QueryLimits;
use podwatch::models::{PodFilter, TimeWindow};
use sqlx::sqlite::SqlitePoolOptions;

fn all() -> PodFilter {
    PodFilter::All
}

fn named(name: &str) -> PodFilter {
    PodFilter::Named(name.into())
}

#[tokio::test]
async fn init_is_idempotent() {
    let (_dir, store) = temp_store().await;
    store.init().await.unwrap();
    store.init().await.unwrap();
    assert_eq!(store.row_counts().await.unwrap(), RowCounts::default());
}

#[tokio::test]
async fn query_on_empty_store_returns_nothing() {
    let (_dir, store) = temp_store().await;
    let latest = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert!(latest.is_empty());
    let ranged = store
        .query(&TimeWindow::between(at(0), at(60)), &all())
        .await
        .unwrap();
    assert!(ranged.is_empty());
}

#[tokio::test]
async fn insert_then_latest_round_trips_tree() {
    let (_dir, store) = temp_store().await;
    let snap = grid_snapshot(at(0), 3, 2);
    let id = store.insert(&snap).await.unwrap();

    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out.len(), 1);
    let cluster = &out[0];
    assert_eq!(cluster.id, id);
    assert_eq!(cluster.created_at, at(0));
    assert_eq!(cluster.pods.len(), 3);
    for (p, (stored, sampled)) in cluster.pods.iter().zip(&snap.pods).enumerate() {
        assert_eq!(stored.name, sampled.name, "pod order preserved at {}", p);
        let got: Vec<(String, i64, i64)> = stored
            .containers
            .iter()
            .map(|c| (c.name.clone(), c.cpu_usage, c.memory_usage))
            .collect();
        let want: Vec<(String, i64, i64)> = sampled
            .containers
            .iter()
            .map(|c| (c.name.clone(), c.cpu_millicores, c.memory_bytes))
            .collect();
        assert_eq!(got, want);
    }

    assert_eq!(
        store.row_counts().await.unwrap(),
        RowCounts {
            clusters: 1,
            pods: 3,
            containers: 6
        }
    );
}

#[tokio::test]
async fn empty_snapshot_is_stored_with_no_pods() {
    let (_dir, store) = temp_store().await;
    store.insert(&snapshot(at(0), vec![])).await.unwrap();
    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].pods.is_empty());
}

#[tokio::test]
async fn latest_returns_only_most_recent() {
    let (_dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(0), 1, 1)).await.unwrap();
    let newest = store.insert(&grid_snapshot(at(20), 1, 1)).await.unwrap();
    // Inserted last but sampled earlier.
    store.insert(&grid_snapshot(at(10), 2, 1)).await.unwrap();

    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, newest);
    assert_eq!(out[0].created_at, at(20));
}

#[tokio::test]
async fn literal_scenario() {
    let (_dir, store) = temp_store().await;
    let t0 = at(0);
    let a = store
        .insert(&snapshot(t0, vec![pod("p1", vec![container("c1", 50, 1_048_576)])]))
        .await
        .unwrap();
    let b = store
        .insert(&snapshot(
            t0 + TimeDelta::minutes(10),
            vec![pod("p1", vec![container("c1", 80, 1_048_576)])],
        ))
        .await
        .unwrap();

    let early = TimeWindow::between(t0 - TimeDelta::seconds(1), t0 + TimeDelta::minutes(5));
    let out = store.query(&early, &named("p1")).await.unwrap();
    assert_eq!(out.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a]);
    assert_eq!(out[0].pods[0].containers[0].cpu_usage, 50);

    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b]);
    assert_eq!(out[0].pods[0].containers[0].cpu_usage, 80);

    let both = TimeWindow::between(t0 - TimeDelta::seconds(1), t0 + TimeDelta::minutes(15));
    let out = store.query(&both, &all()).await.unwrap();
    assert_eq!(out.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a, b]);

    let summary = store
        .delete(&TimeWindow::until(t0 + TimeDelta::minutes(5)))
        .await
        .unwrap();
    assert_eq!(
        summary,
        DeleteSummary {
            clusters: 1,
            pods: 1,
            containers: 1
        }
    );
    let out = store.query(&both, &all()).await.unwrap();
    assert_eq!(out.iter().map(|c| c.id).collect::<Vec<_>>(), vec![b]);
}

#[tokio::test]
async fn window_bounds_are_inclusive_and_ascending() {
    let (_dir, store) = temp_store().await;
    for m in [0, 5, 10, 15, 20] {
        store.insert(&grid_snapshot(at(m), 1, 1)).await.unwrap();
    }
    let out = store
        .query(&TimeWindow::between(at(5), at(15)), &all())
        .await
        .unwrap();
    let times: Vec<_> = out.iter().map(|c| c.created_at).collect();
    assert_eq!(times, vec![at(5), at(10), at(15)]);

    let point = store
        .query(&TimeWindow::between(at(10), at(10)), &all())
        .await
        .unwrap();
    assert_eq!(point.len(), 1);
    assert_eq!(point[0].created_at, at(10));
}

#[tokio::test]
async fn millisecond_timestamps_survive() {
    let (_dir, store) = temp_store().await;
    let t = at(0) + TimeDelta::milliseconds(123);
    store.insert(&grid_snapshot(t, 1, 1)).await.unwrap();
    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out[0].created_at, t);
}

#[tokio::test]
async fn pod_filter_keeps_clusters_and_narrows_pods() {
    let (_dir, store) = temp_store().await;
    store
        .insert(&snapshot(
            at(0),
            vec![
                pod("api", vec![container("app", 1, 1)]),
                pod("db", vec![container("postgres", 2, 2), container("exporter", 3, 3)]),
            ],
        ))
        .await
        .unwrap();
    store
        .insert(&snapshot(at(1), vec![pod("api", vec![container("app", 4, 4)])]))
        .await
        .unwrap();

    let window = TimeWindow::between(at(0), at(1));
    let out = store.query(&window, &named("db")).await.unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].pods.len(), 1);
    assert_eq!(out[0].pods[0].name, "db");
    assert_eq!(out[0].pods[0].containers.len(), 2);
    assert!(out[1].pods.is_empty());

    let none = store.query(&window, &named("missing")).await.unwrap();
    assert_eq!(none.len(), 2);
    assert!(none.iter().all(|c| c.pods.is_empty()));

    let latest = store.query(&TimeWindow::unbounded(), &named("db")).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert!(latest[0].pods.is_empty());
}

#[tokio::test]
async fn duplicate_container_names_are_kept() {
    let (_dir, store) = temp_store().await;
    store
        .insert(&snapshot(
            at(0),
            vec![pod("p", vec![container("c", 1, 1), container("c", 2, 2)])],
        ))
        .await
        .unwrap();
    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    let cpus: Vec<i64> = out[0].pods[0].containers.iter().map(|c| c.cpu_usage).collect();
    assert_eq!(cpus, vec![1, 2]);
}

#[tokio::test]
async fn inverted_window_is_rejected() {
    let (_dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(0), 1, 1)).await.unwrap();

    let err = store
        .query(&TimeWindow::between(at(10), at(0)), &all())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetricsError::Validation(ValidationError::StartAfterEnd)
    ));

    let err = store
        .delete(&TimeWindow::between(at(10), at(0)))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(store.row_counts().await.unwrap().clusters, 1);
}

#[tokio::test]
async fn half_open_query_is_rejected() {
    let (_dir, store) = temp_store().await;
    let err = store
        .query(&TimeWindow::since(at(0)), &all())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MetricsError::Validation(ValidationError::IncompleteWindow)
    ));
}

#[tokio::test]
async fn span_caps_depend_on_filter() {
    let (_dir, store) = temp_store().await;
    let four_hours = TimeWindow::between(at(0), at(0) + TimeDelta::hours(4));
    let over_four = TimeWindow::between(at(0), at(0) + TimeDelta::hours(4) + TimeDelta::seconds(1));
    let three_days = TimeWindow::between(at(0), at(0) + TimeDelta::hours(72));
    let over_three_days =
        TimeWindow::between(at(0), at(0) + TimeDelta::hours(72) + TimeDelta::seconds(1));

    assert!(store.query(&four_hours, &all()).await.is_ok());
    let err = store.query(&over_four, &all()).await.unwrap_err();
    assert!(matches!(
        err,
        MetricsError::Validation(ValidationError::SpanTooWide { .. })
    ));

    assert!(store.query(&over_four, &named("p")).await.is_ok());
    assert!(store.query(&three_days, &named("p")).await.is_ok());
    let err = store.query(&over_three_days, &named("p")).await.unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn custom_query_limits_apply() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = MetricsStore::connect(&db_path(&dir), 2)
        .await
        .unwrap()
        .with_query_limits(QueryLimits {
            all_pods_max_span: TimeDelta::minutes(30),
            single_pod_max_span: TimeDelta::hours(1),
        });
    store.init().await.unwrap();

    assert!(store
        .query(&TimeWindow::between(at(0), at(31)), &all())
        .await
        .is_err());
    assert!(store
        .query(&TimeWindow::between(at(0), at(31)), &named("p"))
        .await
        .is_ok());
}

#[tokio::test]
async fn delete_without_bounds_removes_everything() {
    let (_dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(0), 2, 2)).await.unwrap();
    store.insert(&grid_snapshot(at(5), 1, 3)).await.unwrap();

    let summary = store.delete(&TimeWindow::unbounded()).await.unwrap();
    assert_eq!(
        summary,
        DeleteSummary {
            clusters: 2,
            pods: 3,
            containers: 7
        }
    );
    assert_eq!(store.row_counts().await.unwrap(), RowCounts::default());
}

#[tokio::test]
async fn delete_with_single_bound() {
    let (_dir, store) = temp_store().await;
    for m in [0, 10, 20] {
        store.insert(&grid_snapshot(at(m), 1, 1)).await.unwrap();
    }

    let summary = store.delete(&TimeWindow::since(at(20))).await.unwrap();
    assert_eq!(summary.clusters, 1);
    let summary = store.delete(&TimeWindow::until(at(0))).await.unwrap();
    assert_eq!(summary.clusters, 1);

    let left = store
        .query(&TimeWindow::between(at(0), at(20)), &all())
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].created_at, at(10));
    assert_eq!(
        store.row_counts().await.unwrap(),
        RowCounts {
            clusters: 1,
            pods: 1,
            containers: 1
        }
    );
}

#[tokio::test]
async fn delete_matching_nothing_is_ok() {
    let (_dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(10), 1, 1)).await.unwrap();
    let summary = store
        .delete(&TimeWindow::between(at(0), at(5)))
        .await
        .unwrap();
    assert_eq!(summary, DeleteSummary::default());
}

#[tokio::test]
async fn delete_with_vacuum_enabled() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = MetricsStore::connect(&db_path(&dir), 2)
        .await
        .unwrap()
        .with_vacuum_after_delete(true);
    store.init().await.unwrap();
    store.insert(&grid_snapshot(at(0), 2, 2)).await.unwrap();
    let summary = store.delete(&TimeWindow::unbounded()).await.unwrap();
    assert_eq!(summary.clusters, 1);
    assert_eq!(store.row_counts().await.unwrap(), RowCounts::default());
}

#[tokio::test]
async fn failed_delete_rolls_back_every_level() {
    let (dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(0), 2, 2)).await.unwrap();
    let before = store.row_counts().await.unwrap();

    // The cluster-level delete runs last, after containers and pods are already gone.
    let raw = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}", db_path(&dir)))
        .await
        .unwrap();
    sqlx::query(
        "CREATE TRIGGER block_cluster_delete BEFORE DELETE ON cluster_snapshot
         BEGIN SELECT RAISE(ABORT, 'forced'); END",
    )
    .execute(&raw)
    .await
    .unwrap();
    raw.close().await;

    let err = store.delete(&TimeWindow::unbounded()).await.unwrap_err();
    assert!(matches!(err, MetricsError::Storage(_)));
    assert!(!err.is_fatal());
    assert_eq!(store.row_counts().await.unwrap(), before);

    let out = store.query(&TimeWindow::unbounded(), &all()).await.unwrap();
    assert_eq!(out[0].pods.len(), 2);
    assert!(out[0].pods.iter().all(|p| p.containers.len() == 2));
}

#[tokio::test]
async fn failed_insert_leaves_no_rows_behind() {
    let (dir, store) = temp_store().await;

    // Cluster and pod rows are written before the first container row trips the trigger.
    let raw = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}", db_path(&dir)))
        .await
        .unwrap();
    sqlx::query(
        "CREATE TRIGGER block_container_insert BEFORE INSERT ON container_snapshot
         BEGIN SELECT RAISE(ABORT, 'forced'); END",
    )
    .execute(&raw)
    .await
    .unwrap();
    raw.close().await;

    let err = store.insert(&grid_snapshot(at(0), 3, 2)).await.unwrap_err();
    assert!(matches!(err, MetricsError::Storage(_)));
    assert_eq!(store.row_counts().await.unwrap(), RowCounts::default());
    assert!(store
        .query(&TimeWindow::unbounded(), &all())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn sub_millisecond_start_excludes_earlier_row() {
    let (_dir, store) = temp_store().await;
    store.insert(&grid_snapshot(at(0), 1, 1)).await.unwrap();

    let start = at(0) + TimeDelta::microseconds(500);
    let out = store
        .query(&TimeWindow::between(start, at(10)), &all())
        .await
        .unwrap();
    assert!(out.is_empty());

    let summary = store.delete(&TimeWindow::since(start)).await.unwrap();
    assert_eq!(summary, DeleteSummary::default());
    assert_eq!(store.row_counts().await.unwrap().clusters, 1);
}

#[tokio::test]
async fn closed_store_reports_fatal_error() {
    let (_dir, store) = temp_store().await;
    store.close().await;
    let err = store.insert(&grid_snapshot(at(0), 1, 1)).await.unwrap_err();
    assert!(err.is_fatal());
}
