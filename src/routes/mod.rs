// HTTP routes: live metrics, metrics history query + purge, version

mod error;
mod http;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics_source::MetricsSource;
use crate::metrics_store::MetricsStore;

pub(crate) use error::ApiError;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<MetricsStore>,
    pub(crate) source: Arc<dyn MetricsSource>,
}

pub fn app(store: Arc<MetricsStore>, source: Arc<dyn MetricsSource>) -> Router {
    let state = AppState { store, source };
    Router::new()
        .route("/", get(|| async { "podwatch: pod metrics history" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/v1/getpodmetrics", get(http::get_live_pod_metrics)) // GET /api/v1/getpodmetrics
        .route("/api/v2/getpodmetrics", get(http::get_pod_metrics)) // GET /api/v2/getpodmetrics
        .route("/api/v1/deletepodmetrics", post(http::delete_pod_metrics)) // POST /api/v1/deletepodmetrics
        .fallback(http::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
