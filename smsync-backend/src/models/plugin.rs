//! Mattermost importer plugin status
//!
//! Computed on demand from the plugin manifest, the local bundle directory
//! and the Mattermost `/api/v4/plugins` listing; never persisted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    pub plugin_id: String,
    pub expected_version: Option<String>,
    pub installed: bool,
    pub enabled: bool,
    pub installed_version: Option<String>,
    /// Exact string mismatch between expected and installed version
    pub needs_update: bool,
    /// Whether the local install artifact is present
    pub bundle_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<String>,
    /// Set when status could not be computed (e.g. MM credentials missing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginStatus {
    /// Plugin is fully operational: installed, enabled, at expected version
    pub fn is_healthy(&self) -> bool {
        self.installed && self.enabled && !self.needs_update
    }
}
