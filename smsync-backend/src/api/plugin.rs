//! Plugin lifecycle endpoints
//!
//! Thin handlers over [`crate::services::plugin::PluginManager`]; status is
//! read-only, deploy/enable/ensure remediate.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use chrono::Utc;
use serde_json::json;
use smsync_common::events::SyncEvent;

use crate::error::ApiResult;
use crate::models::PluginStatus;
use crate::AppState;

/// GET /plugin/status
pub async fn plugin_status(State(state): State<AppState>) -> Json<PluginStatus> {
    Json(state.plugin.compute_status().await)
}

/// POST /plugin/deploy
pub async fn plugin_deploy(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let ack = state.plugin.deploy().await?;
    Ok(Json(json!({
        "status": "uploaded",
        "plugin_id": ack.plugin_id,
        "version": ack.version,
    })))
}

/// POST /plugin/enable
pub async fn plugin_enable(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let plugin_id = state.plugin.enable().await?;
    Ok(Json(json!({
        "status": "enabled",
        "plugin_id": plugin_id,
    })))
}

/// POST /plugin/ensure
pub async fn plugin_ensure(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let status = state.plugin.ensure().await?;
    state.event_bus.emit_lossy(SyncEvent::PluginEnsured {
        plugin_id: status.plugin_id.clone(),
        installed: status.installed,
        enabled: status.enabled,
        timestamp: Utc::now(),
    });

    let mut body = serde_json::to_value(&status).unwrap_or_else(|_| json!({}));
    body["status"] = json!("ensured");
    Ok(Json(body))
}

/// Build plugin lifecycle routes
pub fn plugin_routes() -> Router<AppState> {
    Router::new()
        .route("/plugin/status", get(plugin_status))
        .route("/plugin/deploy", post(plugin_deploy))
        .route("/plugin/enable", post(plugin_enable))
        .route("/plugin/ensure", post(plugin_ensure))
}
