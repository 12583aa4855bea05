use anyhow::Result;
use podwatch::*;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = Arc::new(
        metrics_store::MetricsStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?
        .with_query_limits(app_config.query_limits())
        .with_vacuum_after_delete(app_config.database.vacuum_after_delete),
    );
    store.init().await?;

    let source: Arc<dyn metrics_source::MetricsSource> = Arc::new(
        metrics_source::KubeMetricsSource::connect(
            app_config.kubernetes.kubeconfig.as_deref().map(Path::new),
        )
        .await?,
    );

    let (collector_task, snapshots_saved) =
        collector::spawn(source.clone(), store.clone(), app_config.collector_config());
    let (pruner_task, clusters_pruned) =
        pruner::spawn(store.clone(), app_config.retention_config()?);
    tracing::info!(
        namespace = %app_config.kubernetes.namespace,
        interval_secs = app_config.collector.interval_secs,
        retention_days = app_config.retention.retention_days,
        "Periodic jobs started"
    );

    let app = routes::app(store.clone(), source);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
        }
    }

    let collector_state = collector_task.stop().await;
    let pruner_state = pruner_task.stop().await;
    tracing::info!(
        collector = ?collector_state,
        pruner = ?pruner_state,
        snapshots_saved = snapshots_saved.load(Ordering::Relaxed),
        clusters_pruned = clusters_pruned.load(Ordering::Relaxed),
        "Periodic jobs stopped"
    );
    store.close().await;

    Ok(())
}
