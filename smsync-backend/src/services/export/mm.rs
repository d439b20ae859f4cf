//! Mattermost REST API client
//!
//! Thin wrapper over one pooled reqwest client with the admin bearer token
//! attached, plus the plugin route helpers and the team-id lookup cache.

use reqwest::Client;
use serde_json::Value;
use smsync_common::Result;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::Settings;

/// Development fallback team id, used when neither MM_TEAM_ID nor a
/// resolvable MM_TEAM name is available
const FALLBACK_TEAM_ID: &str = "b7u9rycm43nip86mdiuqsxdcbe";

/// Response with the body already drained, detached from reqwest types
pub struct MmResponse {
    pub status: u16,
    pub body: String,
}

impl MmResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Created or fetched: the statuses plugin routes answer with
    pub fn is_created(&self) -> bool {
        self.status == 200 || self.status == 201
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// Error text: the `error`/`message` field when the body is JSON,
    /// otherwise the raw body
    pub fn error_text(&self) -> String {
        self.json()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("message"))
                    .and_then(|e| e.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| self.body.clone())
    }
}

pub struct MmClient {
    http: Client,
    base_url: String,
    token: String,
    plugin_id: String,
    team_name: String,
    team_id_override: Option<String>,
    cached_team_id: Mutex<Option<String>>,
}

impl MmClient {
    /// Build a client from settings; None when credentials are missing
    pub fn from_settings(settings: &Settings, plugin_id: String) -> Option<Self> {
        let base_url = settings.mm_url.clone()?;
        let token = settings.mm_token.clone()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Some(Self {
            http,
            base_url,
            token,
            plugin_id,
            team_name: settings.mm_team.clone(),
            team_id_override: settings.mm_team_id.clone(),
            cached_team_id: Mutex::new(None),
        })
    }

    /// Plugin HTTP route under the importer plugin
    pub fn plugin_route(&self, route: &str) -> String {
        format!("/plugins/{}/api/v1/{}", self.plugin_id, route)
    }

    async fn drain(response: reqwest::Response) -> Result<MmResponse> {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(MmResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> Result<MmResponse> {
        tracing::debug!("MM API GET {}{}", self.base_url, path);
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::drain(response).await
    }

    pub async fn post_json(&self, path: &str, payload: &Value) -> Result<MmResponse> {
        tracing::debug!("MM API POST {}{}", self.base_url, path);
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;
        let drained = Self::drain(response).await?;
        if !drained.is_success() {
            tracing::error!(
                "MM API POST {}{} status={} body={}",
                self.base_url,
                path,
                drained.status,
                &drained.body.chars().take(200).collect::<String>()
            );
        }
        Ok(drained)
    }

    pub async fn post_multipart(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<MmResponse> {
        tracing::debug!("MM API POST(multipart) {}{}", self.base_url, path);
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        Self::drain(response).await
    }

    /// Resolve the token owner's user id
    pub async fn me(&self) -> Option<String> {
        match self.get("/api/v4/users/me").await {
            Ok(response) if response.is_success() => {
                let id = response.json()?.get("id")?.as_str()?.to_string();
                tracing::info!("Resolved Mattermost token owner: {}", id);
                Some(id)
            }
            Ok(response) => {
                tracing::error!("Failed to resolve token owner: status {}", response.status);
                None
            }
            Err(e) => {
                tracing::error!("Failed to resolve token owner: {}", e);
                None
            }
        }
    }

    /// Resolve the target team id: explicit override, then lookup by team
    /// name (cached for the process), then the development fallback.
    pub async fn team_id(&self) -> String {
        if let Some(team_id) = &self.team_id_override {
            return team_id.clone();
        }
        let mut cache = self.cached_team_id.lock().await;
        if let Some(team_id) = cache.as_ref() {
            return team_id.clone();
        }
        match self.get(&format!("/api/v4/teams/name/{}", self.team_name)).await {
            Ok(response) if response.is_success() => {
                if let Some(id) = response
                    .json()
                    .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)))
                {
                    *cache = Some(id.clone());
                    return id;
                }
                tracing::error!("Team lookup for '{}' returned no id", self.team_name);
            }
            Ok(response) => {
                tracing::error!(
                    "Failed to resolve team id for '{}': status {}",
                    self.team_name,
                    response.status
                );
            }
            Err(e) => {
                tracing::error!("Failed to resolve team id for '{}': {}", self.team_name, e);
            }
        }
        FALLBACK_TEAM_ID.to_string()
    }

    /// Add a user to the configured team.
    ///
    /// Best-effort: "already a member" responses are expected and logged at
    /// debug only.
    pub async fn ensure_team_member(&self, user_id: &str) {
        let team_id = self.team_id().await;
        let payload = serde_json::json!({"team_id": team_id, "user_id": user_id});
        match self
            .post_json(&format!("/api/v4/teams/{team_id}/members"), &payload)
            .await
        {
            Ok(response) if !response.is_created() => {
                tracing::debug!(
                    "ensure team member for {}: {} {}",
                    user_id,
                    response.status,
                    response.error_text()
                );
            }
            Ok(_) => {
                tracing::debug!("User {} is a member of team {}", user_id, team_id);
            }
            Err(e) => {
                tracing::error!("Failed to add user {} to team {}: {}", user_id, team_id, e);
            }
        }
    }
}
