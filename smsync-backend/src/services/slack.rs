//! Slack Web API client
//!
//! Two calls only: the workspace emoji list (custom emoji import) and
//! authenticated file downloads (attachment export). Without a bot token the
//! emoji list is empty and downloads go out unauthenticated.

use reqwest::Client;
use smsync_common::Result;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    token: Option<String>,
}

impl SlackClient {
    pub fn new(token: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { http, token }
    }

    /// Fetch the workspace custom emoji map (name → URL or `alias:<name>`).
    ///
    /// Best-effort: any failure logs and returns an empty map, matching the
    /// pipeline's behavior of skipping custom emojis when the list is
    /// unavailable.
    pub async fn emoji_list(&self) -> HashMap<String, String> {
        let Some(token) = self.token.as_deref() else {
            tracing::warn!("SLACK_BOT_TOKEN not configured, skipping emoji list fetch");
            return HashMap::new();
        };

        let response = self
            .http
            .get("https://slack.com/api/emoji.list")
            .bearer_auth(token)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::error!("Slack API error: {}", r.status());
                return HashMap::new();
            }
            Err(e) => {
                tracing::error!("Failed to fetch Slack emoji list: {}", e);
                return HashMap::new();
            }
        };

        #[derive(serde::Deserialize)]
        struct EmojiListResponse {
            ok: bool,
            #[serde(default)]
            error: Option<String>,
            #[serde(default)]
            emoji: HashMap<String, String>,
        }

        match response.json::<EmojiListResponse>().await {
            Ok(body) if body.ok => {
                tracing::info!("Fetched Slack emoji list: {} emojis", body.emoji.len());
                body.emoji
            }
            Ok(body) => {
                tracing::error!("Slack API error: {}", body.error.unwrap_or_default());
                HashMap::new()
            }
            Err(e) => {
                tracing::error!("Failed to parse Slack emoji list: {}", e);
                HashMap::new()
            }
        }
    }

    /// Download a file, authenticating when a token is configured
    pub async fn download(&self, url: &str) -> Result<Downloaded> {
        let mut request = self.http.get(url);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(Downloaded { status, body })
    }
}

/// Download result, detached from the HTTP client types
pub struct Downloaded {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Downloaded {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
