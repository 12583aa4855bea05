// Handlers: version, live pod metrics, pod metrics history, metrics purge

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::error::ValidationError;
use crate::models::{ClusterSnapshot, PodFilter, PodSample, TimeWindow};

/// Query string of GET /api/v1/getpodmetrics. Empty namespace means all namespaces.
#[derive(Debug, Default, Deserialize)]
pub(super) struct LivePodMetricsParams {
    #[serde(default)]
    namespace: String,
}

/// Query string of GET /api/v2/getpodmetrics. Times are RFC 3339.
#[derive(Debug, Default, Deserialize)]
pub(super) struct GetPodMetricsParams {
    pod_name: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
}

/// Body of POST /api/v1/deletepodmetrics. Omitted bounds are open; `{}` deletes everything.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct DeletePodMetricsRequest {
    start_time: Option<String>,
    end_time: Option<String>,
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/getpodmetrics: current usage straight from the metrics source, nothing stored.
pub(super) async fn get_live_pod_metrics(
    State(state): State<AppState>,
    Query(params): Query<LivePodMetricsParams>,
) -> Result<Json<Vec<PodSample>>, ApiError> {
    let pods = state.source.fetch(params.namespace.trim()).await?;
    Ok(Json(pods))
}

/// GET /api/v2/getpodmetrics: latest snapshot, or every snapshot in [start_time, end_time].
/// Giving either time requires both.
pub(super) async fn get_pod_metrics(
    State(state): State<AppState>,
    Query(params): Query<GetPodMetricsParams>,
) -> Result<Json<Vec<ClusterSnapshot>>, ApiError> {
    let filter = PodFilter::parse(params.pod_name.as_deref());
    let start = non_empty(params.start_time.as_deref());
    let end = non_empty(params.end_time.as_deref());

    let window = if start.is_some() || end.is_some() {
        TimeWindow::between(
            parse_time("start_time", start.unwrap_or_default())?,
            parse_time("end_time", end.unwrap_or_default())?,
        )
    } else {
        TimeWindow::unbounded()
    };

    let snapshots = state.store.query(&window, &filter).await?;
    Ok(Json(snapshots))
}

/// POST /api/v1/deletepodmetrics: hard-delete snapshots in the given bounds.
/// No body (or a blank one) is the same as `{}`.
pub(super) async fn delete_pod_metrics(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: DeletePodMetricsRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DeletePodMetricsRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {}", e))
        })?
    };
    let window = TimeWindow {
        start: non_empty(req.start_time.as_deref())
            .map(|s| parse_time("start_time", s))
            .transpose()?,
        end: non_empty(req.end_time.as_deref())
            .map(|s| parse_time("end_time", s))
            .transpose()?,
    };

    let deleted = state.store.delete(&window).await?;
    tracing::info!(
        operation = "delete_pod_metrics",
        clusters = deleted.clusters,
        pods = deleted.pods,
        containers = deleted.containers,
        "Metrics deleted on request"
    );
    Ok(Json(serde_json::json!({
        "status": "OK",
        "deleted": deleted,
    })))
}

pub(super) async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not found")
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ValidationError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}
