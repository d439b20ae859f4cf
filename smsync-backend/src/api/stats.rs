//! Mapping statistics endpoint

use axum::{extract::State, routing::get, Json, Router};

use crate::error::ApiResult;
use crate::services::stats::{self, MappingStats};
use crate::AppState;

/// GET /stats/mappings
pub async fn mapping_stats(State(state): State<AppState>) -> ApiResult<Json<MappingStats>> {
    let stats = stats::mapping_stats(&state.db).await?;
    Ok(Json(stats))
}

/// Build stats routes
pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats/mappings", get(mapping_stats))
}
