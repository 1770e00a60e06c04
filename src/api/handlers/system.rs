//! System endpoints: liveness, readiness, metrics.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::app_state::AppState;

/// Probe response body.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

impl HealthResponse {
    fn new(status: &'static str) -> Self {
        Self {
            status,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// `GET /health/live`: The process is up.
pub async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse::new("UP")))
}

/// `GET /health/ready`: Whether the store answered the last health check.
///
/// A `NotReady` read asks the checker for an extra check without waiting
/// for it.
pub async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.health.check_readiness() {
        (StatusCode::OK, Json(HealthResponse::new("UP")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("DOWN")),
        )
    }
}

/// `GET /metrics`: Data-access metrics snapshot.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.metrics_snapshot())
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
}
