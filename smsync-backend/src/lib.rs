//! smsync backend library interface
//!
//! Exposes the application state and router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod progress;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::services::plugin::PluginManager;
use smsync_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Resolved service settings
    pub settings: Arc<Settings>,
    /// Plugin lifecycle manager (ensure serialization lives here)
    pub plugin: Arc<PluginManager>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: Arc<Settings>) -> Self {
        let plugin = Arc::new(PluginManager::new(settings.clone()));
        Self {
            db,
            event_bus,
            settings,
            plugin,
            startup_time: Utc::now(),
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::upload_routes())
        .merge(api::jobs_routes())
        .merge(api::progress_routes())
        .merge(api::stats_routes())
        .merge(api::export_routes())
        .merge(api::plugin_routes())
        // The dashboard is served from a different origin in development
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
