//! Export trigger endpoint

use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;

use crate::services::export::run_export;
use crate::AppState;

/// POST /export
///
/// Starts an export run in the background and acknowledges immediately;
/// completion is observed through /jobs and the progress stream.
pub async fn start_export(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::info!("Starting export to Mattermost");

    let pool = state.db.clone();
    let settings = state.settings.clone();
    let event_bus = state.event_bus.clone();
    tokio::spawn(async move {
        if let Err(e) = run_export(pool, settings, event_bus, None).await {
            tracing::error!("Export run failed: {}", e);
        }
    });

    Json(json!({
        "status": "export_started",
        "message": "Export started in the background",
    }))
}

/// Build export routes
pub fn export_routes() -> Router<AppState> {
    Router::new().route("/export", post(start_export))
}
