//! Job registry endpoint

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiResult;
use crate::services::registry;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /jobs
///
/// Most-recent-first job list with derived totals and merged counters.
/// Polled every 3 seconds by the dashboard; reads only.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let jobs = registry::job_views(&state.db, query.limit.clamp(1, 500)).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// Build job registry routes
pub fn jobs_routes() -> Router<AppState> {
    Router::new().route("/jobs", get(list_jobs))
}
