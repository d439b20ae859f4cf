//! Attachment export
//!
//! Downloads the file from Slack (bearer auth) and hands it to the plugin
//! as base64, which uploads it into the target channel and returns the
//! Mattermost file id for the message export to reference.

use base64::Engine;
use serde_json::json;

use crate::db;
use crate::models::entity::relation;
use crate::models::{Entity, EntityType, MappingStatus};

use super::{set_status, ExportContext};

/// Resolve the Mattermost channel this attachment uploads into: the
/// raw channel_id mapping when present, else walk
/// attached_to → message → posted_in → channel.
async fn resolve_channel_id(ctx: &ExportContext, entity: &Entity) -> Option<String> {
    if let Some(channel_slack_id) = entity.raw_data.get("channel_id").and_then(|v| v.as_str()) {
        if let Ok(Some(channel)) =
            db::entities::find_by_slack_id(&ctx.pool, EntityType::Channel, channel_slack_id).await
        {
            if let Some(mm_id) = channel.mattermost_id.filter(|id| !id.is_empty()) {
                return Some(mm_id);
            }
        }
    }

    let message = db::entities::related_to(&ctx.pool, entity.id, relation::ATTACHED_TO)
        .await
        .ok()??;
    let channel = db::entities::related_to(&ctx.pool, message.id, relation::POSTED_IN)
        .await
        .ok()??;
    channel.mattermost_id.filter(|id| !id.is_empty())
}

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    tracing::debug!("[EXPORT] attachment {}", entity.slack_id);
    let raw = &entity.raw_data;

    let filename = raw
        .get("name")
        .or_else(|| raw.get("title"))
        .or_else(|| raw.get("filename"))
        .and_then(|v| v.as_str())
        .unwrap_or("file.bin")
        .to_string();

    let Some(channel_id) = resolve_channel_id(ctx, entity).await else {
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("No target channel for attachment"),
        )
        .await;
        return;
    };

    // Content: inline base64 when present, else download from Slack
    let content_base64 = match raw.get("content_base64").and_then(|v| v.as_str()) {
        Some(content) => content.to_string(),
        None => {
            let Some(url) = raw
                .get("url_private")
                .or_else(|| raw.get("url_private_download"))
                .and_then(|v| v.as_str())
            else {
                set_status(
                    ctx,
                    entity,
                    MappingStatus::Failed,
                    None,
                    Some("No content source: neither content_base64 nor url_private"),
                )
                .await;
                return;
            };
            match ctx.slack.download(url).await {
                Ok(response) if response.is_success() => {
                    base64::engine::general_purpose::STANDARD.encode(response.body)
                }
                Ok(response) => {
                    let error = format!("Failed to download from Slack: {}", response.status);
                    set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
                    return;
                }
                Err(e) => {
                    set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string()))
                        .await;
                    return;
                }
            }
        }
    };

    let payload = json!({
        "channel_id": channel_id,
        "filename": filename,
        "content_base64": content_base64,
    });

    let response = match ctx.mm.post_json(&ctx.mm.plugin_route("attachment"), &payload).await {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if !response.is_created() {
        let error = format!(
            "Plugin upload failed: {} {}",
            response.status,
            response.error_text()
        );
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        return;
    }

    match response
        .json()
        .and_then(|v| v.get("file_id").and_then(|id| id.as_str().map(str::to_string)))
    {
        Some(file_id) => {
            set_status(ctx, entity, MappingStatus::Success, Some(&file_id), None).await;
            tracing::debug!("Attachment uploaded, file_id={}", file_id);
        }
        None => {
            let error = format!("No file_id in plugin response: {}", response.body);
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        }
    }
}
