//! Service configuration
//!
//! The backend runs in containers next to Mattermost; everything resolves
//! from the environment first, then the optional TOML file, then compiled
//! defaults (see `smsync_common::config` for the tier order).

use smsync_common::config::{resolve_opt, resolve_str, resolve_u64, ConfigFile};
use std::path::PathBuf;

/// Default plugin identifier when the manifest cannot be read
pub const PLUGIN_DEFAULT_ID: &str = "mm-importer";

#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
    /// SQLite database file
    pub database_path: PathBuf,

    /// Mattermost base URL (e.g. http://mattermost:8065)
    pub mm_url: Option<String>,
    /// Mattermost admin token
    pub mm_token: Option<String>,
    /// Team name used when MM_TEAM_ID is not set
    pub mm_team: String,
    /// Explicit team id override
    pub mm_team_id: Option<String>,

    /// Slack bot token for emoji.list and file downloads
    pub slack_bot_token: Option<String>,

    /// Export worker pool size per entity type
    pub export_workers: usize,

    /// Plugin repository root (holds plugin.json and dist/)
    pub plugin_root: PathBuf,

    /// Directory for uploaded archives
    pub upload_dir: PathBuf,
}

impl Settings {
    /// Resolve settings from the environment and the optional config file
    pub fn load(file: &ConfigFile) -> Self {
        let port = resolve_u64("BACKEND_PORT", file, "port", 8000).min(u16::MAX as u64) as u16;

        // Both SLACK_BOT_TOKEN and the older SLACK_TOKEN spelling are accepted
        let slack_bot_token = resolve_opt("SLACK_BOT_TOKEN", file, "slack_bot_token")
            .or_else(|| std::env::var("SLACK_TOKEN").ok().filter(|t| !t.is_empty()));

        Self {
            host: resolve_str("BACKEND_HOST", file, "host", "0.0.0.0"),
            port,
            database_path: PathBuf::from(resolve_str(
                "DATABASE_PATH",
                file,
                "database_path",
                "smsync.db",
            )),
            mm_url: resolve_opt("MM_URL", file, "mm_url").map(|u| u.trim_end_matches('/').to_string()),
            mm_token: resolve_opt("MM_TOKEN", file, "mm_token"),
            mm_team: resolve_str("MM_TEAM", file, "mm_team", "test"),
            mm_team_id: resolve_opt("MM_TEAM_ID", file, "mm_team_id"),
            slack_bot_token,
            export_workers: resolve_u64("EXPORT_WORKERS", file, "export_workers", 5).max(1) as usize,
            plugin_root: PathBuf::from(resolve_str(
                "PLUGIN_REPO_PATH",
                file,
                "plugin_root",
                "infra/plugin",
            )),
            upload_dir: resolve_opt("UPLOAD_DIR", file, "upload_dir")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Socket address string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether Mattermost credentials are configured
    pub fn has_mm_credentials(&self) -> bool {
        self.mm_url.is_some() && self.mm_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Scoped env names are untouched by other tests
        let settings = Settings::load(&ConfigFile::empty());
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.mm_team, "test");
        assert_eq!(settings.export_workers, 5);
        assert!(settings.bind_addr().ends_with(":8000"));
    }
}
