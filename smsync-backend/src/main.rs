//! smsync-backend - Slack → Mattermost migration service
//!
//! Accepts Slack export archives, runs the import/export pipeline, manages
//! the Mattermost importer plugin, and feeds the migration dashboard over
//! HTTP + SSE.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use smsync_backend::config::Settings;
use smsync_backend::AppState;
use smsync_common::config::ConfigFile;
use smsync_common::events::EventBus;

#[derive(Debug, Parser)]
#[command(name = "smsync-backend", about = "Slack to Mattermost migration backend")]
struct Args {
    /// Bind host (overrides BACKEND_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides BACKEND_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,

    /// TOML config file (overrides SMSYNC_CONFIG)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // Settings resolve ENV → TOML → default; CLI flags win over all tiers
    let config_file = match &args.config {
        Some(path) => ConfigFile::load_from(std::path::Path::new(path)),
        None => ConfigFile::load(),
    };
    let mut settings = Settings::load(&config_file);
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(database) = args.database {
        settings.database_path = database.into();
    }
    let settings = Arc::new(settings);

    info!("Starting smsync-backend");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", settings.database_path.display());

    let db_pool = smsync_backend::db::init_database_pool(&settings.database_path).await?;
    info!("Database connection established");

    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    let state = AppState::new(db_pool, event_bus, settings.clone());

    // Auto-ensure the importer plugin on startup (best-effort)
    let startup_plugin = state.plugin.clone();
    tokio::spawn(async move {
        let status = startup_plugin.compute_status().await;
        if status.error.is_some() {
            tracing::warn!(
                "Skipping startup plugin ensure: {}",
                status.error.unwrap_or_default()
            );
            return;
        }
        if status.is_healthy() {
            tracing::info!("Importer plugin already installed and enabled");
            return;
        }
        tracing::info!("Ensuring Mattermost importer plugin at startup");
        if let Err(e) = startup_plugin.ensure().await {
            tracing::error!("Auto-ensure plugin failed: {}", e);
        }
    });

    let app = smsync_backend::build_router(state);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Backend available at: http://{}", addr);
    info!("Health check: http://{}/healthcheck", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
