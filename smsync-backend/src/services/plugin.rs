//! Mattermost importer plugin lifecycle
//!
//! The server-side import endpoints live in a Mattermost plugin. This
//! manager reads the local plugin manifest and bundle, compares them against
//! what the Mattermost instance reports, and remediates: upload the bundle
//! (`deploy`), flip it on (`enable`), or both (`ensure`).
//!
//! `ensure` holds an async mutex across the deploy+enable sequence so
//! overlapping calls queue behind one in-flight install instead of racing.

use reqwest::Client;
use serde::Deserialize;
use smsync_common::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::{Settings, PLUGIN_DEFAULT_ID};
use crate::models::PluginStatus;

/// Local plugin manifest (plugin.json at the plugin repo root)
#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Mattermost `GET /api/v4/plugins` response
#[derive(Debug, Deserialize)]
struct PluginListing {
    #[serde(default)]
    active: Vec<InstalledPlugin>,
    #[serde(default)]
    inactive: Vec<InstalledPlugin>,
}

#[derive(Debug, Deserialize)]
struct InstalledPlugin {
    id: String,
    #[serde(default)]
    version: Option<String>,
}

/// Successful deploy acknowledgement
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeployAck {
    pub plugin_id: String,
    pub version: Option<String>,
}

/// Plugin id from the local manifest, falling back to the default.
///
/// The export pipeline posts to plugin routes without needing a full
/// manager instance.
pub fn plugin_id_from_manifest(settings: &Settings) -> String {
    let path = settings.plugin_root.join("plugin.json");
    std::fs::read_to_string(&path)
        .ok()
        .and_then(|content| serde_json::from_str::<Manifest>(&content).ok())
        .and_then(|manifest| manifest.id)
        .unwrap_or_else(|| PLUGIN_DEFAULT_ID.to_string())
}

pub struct PluginManager {
    settings: Arc<Settings>,
    http: Client,
    ensure_lock: Mutex<()>,
}

impl PluginManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            settings,
            http,
            ensure_lock: Mutex::new(()),
        }
    }

    fn read_manifest(&self) -> Manifest {
        let path = self.settings.plugin_root.join("plugin.json");
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::error!("Failed to parse plugin manifest {}: {}", path.display(), e);
                    Manifest { id: None, version: None }
                }
            },
            Err(e) => {
                tracing::error!("Failed to read plugin manifest {}: {}", path.display(), e);
                Manifest { id: None, version: None }
            }
        }
    }

    fn bundle_path(&self, plugin_id: &str, version: Option<&str>) -> Option<PathBuf> {
        let version = version?;
        Some(
            self.settings
                .plugin_root
                .join("dist")
                .join(format!("{plugin_id}-{version}.tar.gz")),
        )
    }

    fn mm_credentials(&self) -> Result<(&str, &str)> {
        match (self.settings.mm_url.as_deref(), self.settings.mm_token.as_deref()) {
            (Some(url), Some(token)) => Ok((url, token)),
            _ => Err(Error::Config("MM_URL or MM_TOKEN not set".to_string())),
        }
    }

    /// Compute the current plugin status (read-only, no side effects)
    pub async fn compute_status(&self) -> PluginStatus {
        let manifest = self.read_manifest();
        let plugin_id = manifest.id.clone().unwrap_or_else(|| PLUGIN_DEFAULT_ID.to_string());
        let expected_version = manifest.version.clone();

        let bundle_path = self.bundle_path(&plugin_id, expected_version.as_deref());
        let bundle_exists = bundle_path.as_deref().is_some_and(|p| p.exists());
        let bundle_path_str = bundle_path.map(|p| p.display().to_string());

        let (mm_url, mm_token) = match self.mm_credentials() {
            Ok(creds) => creds,
            Err(e) => {
                return PluginStatus {
                    plugin_id,
                    expected_version,
                    installed: false,
                    enabled: false,
                    installed_version: None,
                    needs_update: false,
                    bundle_exists,
                    bundle_path: bundle_path_str,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut installed = false;
        let mut enabled = false;
        let mut installed_version = None;

        let listing = self
            .http
            .get(format!("{mm_url}/api/v4/plugins"))
            .bearer_auth(mm_token)
            .send()
            .await;

        match listing {
            Ok(response) if response.status().is_success() => {
                match response.json::<PluginListing>().await {
                    Ok(listing) => {
                        if let Some(found) = listing.active.iter().find(|p| p.id == plugin_id) {
                            installed = true;
                            enabled = true;
                            installed_version = found.version.clone();
                        } else if let Some(found) =
                            listing.inactive.iter().find(|p| p.id == plugin_id)
                        {
                            installed = true;
                            installed_version = found.version.clone();
                        }
                    }
                    Err(e) => tracing::error!("Failed to parse plugin listing: {}", e),
                }
            }
            Ok(response) => {
                tracing::error!("Failed to fetch plugins: {}", response.status());
            }
            Err(e) => {
                tracing::error!("Failed to fetch plugins: {}", e);
            }
        }

        // Exact string mismatch; no semver interpretation
        let needs_update = matches!(
            (expected_version.as_deref(), installed_version.as_deref()),
            (Some(expected), Some(actual)) if expected != actual
        );

        PluginStatus {
            plugin_id,
            expected_version,
            installed,
            enabled,
            installed_version,
            needs_update,
            bundle_exists,
            bundle_path: bundle_path_str,
            error: None,
        }
    }

    /// Upload the local bundle to Mattermost (idempotent; force-upgrades)
    pub async fn deploy(&self) -> Result<DeployAck> {
        let (mm_url, mm_token) = self.mm_credentials()?;

        let manifest = self.read_manifest();
        let plugin_id = manifest.id.unwrap_or_else(|| PLUGIN_DEFAULT_ID.to_string());
        let version = manifest.version;

        let bundle_path = self
            .bundle_path(&plugin_id, version.as_deref())
            .filter(|p| p.exists())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Plugin bundle not found for {plugin_id} {}",
                    version.as_deref().unwrap_or("(no version)")
                ))
            })?;

        let bytes = tokio::fs::read(&bundle_path).await?;
        let filename = bundle_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "plugin.tar.gz".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/gzip")
            .map_err(|e| Error::Internal(format!("Invalid bundle mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("plugin", part);

        tracing::info!(plugin_id = %plugin_id, "Uploading plugin bundle to Mattermost");
        let response = self
            .http
            .post(format!("{mm_url}/api/v4/plugins?force=true"))
            .bearer_auth(mm_token)
            .multipart(form)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(DeployAck { plugin_id, version })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Upstream(body))
        }
    }

    /// Enable the installed plugin (idempotent)
    pub async fn enable(&self) -> Result<String> {
        let (mm_url, mm_token) = self.mm_credentials()?;
        let plugin_id = self
            .read_manifest()
            .id
            .unwrap_or_else(|| PLUGIN_DEFAULT_ID.to_string());

        let response = self
            .http
            .post(format!("{mm_url}/api/v4/plugins/{plugin_id}/enable"))
            .bearer_auth(mm_token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(plugin_id)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Upstream(body))
        }
    }

    /// Ensure the plugin is installed at the expected version and enabled.
    ///
    /// Deploy-if-needed, then enable-if-needed, then report the final
    /// status. Concurrent callers serialize on the manager's mutex and
    /// observe the same eventual state.
    pub async fn ensure(&self) -> Result<PluginStatus> {
        let _guard = self.ensure_lock.lock().await;

        let status = self.compute_status().await;
        if let Some(error) = status.error {
            return Err(Error::Config(error));
        }

        if !status.installed || status.needs_update {
            self.deploy().await?;
        }

        if !status.enabled {
            self.enable().await?;
        }

        Ok(self.compute_status().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smsync_common::config::ConfigFile;
    use std::io::Write;

    fn settings_with_plugin_root(root: &std::path::Path) -> Arc<Settings> {
        let mut settings = Settings::load(&ConfigFile::empty());
        settings.plugin_root = root.to_path_buf();
        settings.mm_url = None;
        settings.mm_token = None;
        Arc::new(settings)
    }

    #[tokio::test]
    async fn test_status_without_credentials_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("plugin.json");
        let mut f = std::fs::File::create(&manifest_path).unwrap();
        write!(f, r#"{{"id": "mm-importer", "version": "0.2.0"}}"#).unwrap();

        let manager = PluginManager::new(settings_with_plugin_root(dir.path()));
        let status = manager.compute_status().await;

        assert_eq!(status.plugin_id, "mm-importer");
        assert_eq!(status.expected_version.as_deref(), Some("0.2.0"));
        assert!(!status.installed);
        assert!(status.error.is_some());
        assert!(!status.bundle_exists);
    }

    #[tokio::test]
    async fn test_bundle_detection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.json"),
            r#"{"id": "mm-importer", "version": "0.2.0"}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/mm-importer-0.2.0.tar.gz"), b"gz").unwrap();

        let manager = PluginManager::new(settings_with_plugin_root(dir.path()));
        let status = manager.compute_status().await;
        assert!(status.bundle_exists);
        assert!(status.bundle_path.unwrap().ends_with("mm-importer-0.2.0.tar.gz"));
    }

    #[tokio::test]
    async fn test_missing_manifest_falls_back_to_default_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PluginManager::new(settings_with_plugin_root(dir.path()));
        let status = manager.compute_status().await;
        assert_eq!(status.plugin_id, PLUGIN_DEFAULT_ID);
        assert!(status.expected_version.is_none());
        // No version means no derivable bundle path
        assert!(status.bundle_path.is_none());
    }

    #[tokio::test]
    async fn test_deploy_without_bundle_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("plugin.json"),
            r#"{"id": "mm-importer", "version": "0.2.0"}"#,
        )
        .unwrap();
        let mut settings = Settings::load(&ConfigFile::empty());
        settings.plugin_root = dir.path().to_path_buf();
        settings.mm_url = Some("http://localhost:1".into());
        settings.mm_token = Some("token".into());

        let manager = PluginManager::new(Arc::new(settings));
        match manager.deploy().await {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|a| a.plugin_id)),
        }
    }
}
