//! Configuration resolution helpers
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (handled by the binary, highest priority)
//! 2. Environment variable
//! 3. TOML config file (`SMSYNC_CONFIG` path, else `./smsync.toml`)
//! 4. Compiled default (fallback)

use std::path::PathBuf;

/// Loaded TOML configuration tier
///
/// Missing or unreadable config files are not errors: the file tier simply
/// resolves nothing and lookups fall through to defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    values: Option<toml::Value>,
}

impl ConfigFile {
    /// Load the TOML tier from `SMSYNC_CONFIG`, falling back to
    /// `./smsync.toml` in the working directory.
    pub fn load() -> Self {
        let path = std::env::var("SMSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("smsync.toml"));
        Self::load_from(&path)
    }

    /// Load the TOML tier from an explicit path
    pub fn load_from(path: &std::path::Path) -> Self {
        let values = std::fs::read_to_string(path)
            .ok()
            .and_then(|content| match toml::from_str::<toml::Value>(&content) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Ignoring malformed config file {}: {}", path.display(), e);
                    None
                }
            });
        Self { values }
    }

    /// An empty tier (no file present), for tests
    pub fn empty() -> Self {
        Self { values: None }
    }

    fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.values
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_integer())
    }
}

/// Resolve an optional string setting: ENV → TOML → None
pub fn resolve_opt(env_var: &str, file: &ConfigFile, file_key: &str) -> Option<String> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.is_empty() {
            return Some(value);
        }
    }
    file.get_str(file_key)
}

/// Resolve a string setting with a default: ENV → TOML → default
pub fn resolve_str(env_var: &str, file: &ConfigFile, file_key: &str, default: &str) -> String {
    resolve_opt(env_var, file, file_key).unwrap_or_else(|| default.to_string())
}

/// Resolve an integer setting with a default: ENV → TOML → default
///
/// Unparseable environment values fall through to the next tier with a
/// warning rather than aborting startup.
pub fn resolve_u64(env_var: &str, file: &ConfigFile, file_key: &str, default: u64) -> u64 {
    if let Ok(value) = std::env::var(env_var) {
        match value.parse::<u64>() {
            Ok(n) => return n,
            Err(_) => {
                tracing::warn!("Ignoring non-numeric {}={:?}", env_var, value);
            }
        }
    }
    file.get_int(file_key)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(default)
}
