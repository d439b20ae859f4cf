//! HTTP API handlers for the smsync backend

pub mod export;
pub mod health;
pub mod jobs;
pub mod plugin;
pub mod progress;
pub mod stats;
pub mod upload;

pub use export::export_routes;
pub use health::health_routes;
pub use jobs::jobs_routes;
pub use plugin::plugin_routes;
pub use progress::progress_routes;
pub use stats::stats_routes;
pub use upload::upload_routes;
