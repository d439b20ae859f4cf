//! Custom emoji export
//!
//! Downloads the image recorded at import time and creates the emoji via
//! the core REST API. Names are transliterated/sanitized because Mattermost
//! only accepts `[a-z0-9_]` emoji names; duplicates are adopted.

use serde_json::json;

use crate::models::{Entity, MappingStatus};

use super::text::transliterate_cyrillic;
use super::{set_status, ExportContext};

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    let original_name = entity.slack_id.clone();
    let emoji_name = transliterate_cyrillic(&original_name);
    if emoji_name != original_name {
        tracing::debug!("Transliterated emoji name: {} -> {}", original_name, emoji_name);
    }
    tracing::debug!("[EXPORT] custom emoji {}", emoji_name);

    let Some(url) = entity.raw_data.get("url").and_then(|v| v.as_str()) else {
        tracing::error!("No URL for emoji {} in raw_data", emoji_name);
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("No emoji URL found in raw_data"),
        )
        .await;
        return;
    };

    let image = match ctx.slack.download(url).await {
        Ok(response) if response.is_success() => response.body,
        Ok(response) => {
            let error = format!("Failed to download emoji: {}", response.status);
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
            return;
        }
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    let emoji_json = json!({
        "name": emoji_name,
        "creator_id": ctx.mm_user_id,
    });

    let image_part = match reqwest::multipart::Part::bytes(image)
        .file_name(format!("{emoji_name}.png"))
        .mime_str("image/png")
    {
        Ok(part) => part,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };
    let form = reqwest::multipart::Form::new()
        .part("image", image_part)
        .text("emoji", emoji_json.to_string());

    let response = match ctx.mm.post_multipart("/api/v4/emoji", form).await {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if response.is_created() {
        let mm_id = response
            .json()
            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)));
        set_status(ctx, entity, MappingStatus::Success, mm_id.as_deref(), None).await;
        tracing::debug!("Custom emoji {} exported", emoji_name);
        return;
    }

    let body = response.json().unwrap_or_default();
    if body.get("id").and_then(|v| v.as_str()) == Some("api.emoji.create.duplicate.app_error") {
        // Already there: adopt its id
        if let Ok(lookup) = ctx.mm.get(&format!("/api/v4/emoji/name/{emoji_name}")).await {
            if lookup.is_success() {
                let mm_id = lookup
                    .json()
                    .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)));
                set_status(ctx, entity, MappingStatus::Success, mm_id.as_deref(), None).await;
                tracing::debug!("Emoji {} already exists in Mattermost", emoji_name);
                return;
            }
        }
    }

    let message = body
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| response.body.clone());
    tracing::error!("Emoji upload failed: {} {}", response.status, message);
    set_status(ctx, entity, MappingStatus::Failed, None, Some(&message)).await;
}
