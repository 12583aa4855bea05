// Print stored cluster snapshots as JSON.
// Usage: cargo run --example dump_snapshots -- <DB_PATH> [POD_NAME|%] [START END]
// START and END are RFC 3339. Without them the latest snapshot is printed.

use chrono::{DateTime, Utc};
use podwatch::metrics_store::MetricsStore;
use podwatch::models::{PodFilter, TimeWindow};

fn parse_time(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| anyhow::anyhow!("{}: {}", value, e))?
        .with_timezone(&Utc))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(db_path) = args.first() else {
        anyhow::bail!("usage: dump_snapshots <DB_PATH> [POD_NAME|%] [START END]");
    };
    let filter = PodFilter::parse(args.get(1).map(String::as_str));
    let window = match (args.get(2), args.get(3)) {
        (Some(start), Some(end)) => TimeWindow::between(parse_time(start)?, parse_time(end)?),
        (None, None) => TimeWindow::unbounded(),
        _ => anyhow::bail!("START and END must be given together"),
    };

    let store = MetricsStore::connect(db_path, 1).await?;
    store.init().await?;
    let snapshots = store.query(&window, &filter).await?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);

    let counts = store.row_counts().await?;
    eprintln!(
        "{} cluster / {} pod / {} container rows in {}",
        counts.clusters, counts.pods, counts.containers, db_path
    );
    store.close().await;
    Ok(())
}
