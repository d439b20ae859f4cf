//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status token; the dashboard only checks for "ok"
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET /healthcheck
pub async fn healthcheck(State(state): State<AppState>) -> Json<HealthResponse> {
    tracing::info!("HEALTHCHECK");
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "smsync-backend".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
    })
}

/// Build health check routes (bare and /api-prefixed)
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/api/healthcheck", get(healthcheck))
}
