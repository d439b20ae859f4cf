//! Message export
//!
//! Posts through the plugin's `/import` route, which accepts an explicit
//! author, channel, timestamp and optional thread root; the core REST API
//! won't let an admin impersonate those.

use serde_json::json;
use smsync_common::time::slack_ts_to_millis;
use std::collections::HashSet;

use crate::db;
use crate::models::entity::relation;
use crate::models::{Entity, EntityType, MappingStatus};

use super::text::{
    attachments_to_markdown, blocks_to_markdown, mention_ids_in_blocks, mention_ids_in_text,
    slack_text_to_markdown, MentionResolver,
};
use super::{set_status, ExportContext};

/// Channel resolution: posted_in relation first, raw channel_id fallback
async fn resolve_channel_id(ctx: &ExportContext, entity: &Entity) -> Option<String> {
    if let Ok(Some(channel)) =
        db::entities::related_to(&ctx.pool, entity.id, relation::POSTED_IN).await
    {
        if let Some(mm_id) = channel.mattermost_id.filter(|id| !id.is_empty()) {
            return Some(mm_id);
        }
    }
    let channel_slack_id = entity.raw_data.get("channel_id").and_then(|v| v.as_str())?;
    let channel = db::entities::find_by_slack_id(&ctx.pool, EntityType::Channel, channel_slack_id)
        .await
        .ok()??;
    channel.mattermost_id.filter(|id| !id.is_empty())
}

/// Author resolution: posted_by relation, then raw user lookup, then the
/// token owner as a last resort so the history is preserved even when the
/// author never became a Mattermost account
async fn resolve_author_id(ctx: &ExportContext, entity: &Entity) -> Option<String> {
    if let Ok(Some(user)) = db::entities::related_from(&ctx.pool, entity.id, relation::POSTED_BY).await
    {
        if let Some(mm_id) = user.mattermost_id.filter(|id| !id.is_empty()) {
            return Some(mm_id);
        }
    }
    let author = entity
        .raw_data
        .get("user")
        .or_else(|| entity.raw_data.get("bot_id"))
        .and_then(|v| v.as_str());
    if let Some(author) = author {
        if let Ok(Some(user)) =
            db::entities::find_by_slack_id(&ctx.pool, EntityType::User, author).await
        {
            if let Some(mm_id) = user.mattermost_id.filter(|id| !id.is_empty()) {
                return Some(mm_id);
            }
        }
    }
    Some(ctx.mm_user_id.clone())
}

/// Mattermost file ids of attachments uploaded for this message
async fn collect_file_ids(ctx: &ExportContext, entity: &Entity) -> Vec<String> {
    match db::entities::related_from_all(&ctx.pool, entity.id, relation::ATTACHED_TO).await {
        Ok(attachments) => attachments
            .into_iter()
            .filter(|a| a.entity_type == EntityType::Attachment)
            .filter_map(|a| a.mattermost_id.filter(|id| !id.is_empty()))
            .collect(),
        Err(e) => {
            tracing::error!("Attachment lookup failed for {}: {}", entity.slack_id, e);
            Vec::new()
        }
    }
}

/// Build the id → name maps for every user/channel the message mentions
async fn build_resolver(ctx: &ExportContext, entity: &Entity) -> MentionResolver {
    let raw = &entity.raw_data;
    let mut user_ids: HashSet<String> = HashSet::new();
    let mut channel_ids: HashSet<String> = HashSet::new();

    if let Some(text) = raw.get("text").and_then(|v| v.as_str()) {
        let (users, channels) = mention_ids_in_text(text);
        user_ids.extend(users);
        channel_ids.extend(channels);
    }
    if let Some(blocks) = raw.get("blocks").and_then(|v| v.as_array()) {
        let (users, channels) = mention_ids_in_blocks(blocks);
        user_ids.extend(users);
        channel_ids.extend(channels);
    }
    for attachment in raw.get("attachments").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
        for key in ["pretext", "title", "text", "fallback"] {
            if let Some(text) = attachment.get(key).and_then(|v| v.as_str()) {
                let (users, channels) = mention_ids_in_text(text);
                user_ids.extend(users);
                channel_ids.extend(channels);
            }
        }
    }

    let mut resolver = MentionResolver::default();
    for id in user_ids {
        if let Ok(Some(user)) = db::entities::find_by_slack_id(&ctx.pool, EntityType::User, &id).await
        {
            if let Some(name) = user.raw_data.get("name").and_then(|v| v.as_str()) {
                resolver.users.insert(id, name.to_string());
            }
        }
    }
    for id in channel_ids {
        if let Ok(Some(channel)) =
            db::entities::find_by_slack_id(&ctx.pool, EntityType::Channel, &id).await
        {
            if let Some(name) = channel.raw_data.get("name").and_then(|v| v.as_str()) {
                resolver.channels.insert(id, name.to_string());
            }
        }
    }
    resolver
}

/// Message body: rich blocks, then classic attachments, then plain markup
fn build_text(resolver: &MentionResolver, raw: &serde_json::Value) -> String {
    if let Some(blocks) = raw.get("blocks").and_then(|v| v.as_array()).filter(|b| !b.is_empty()) {
        let markdown = blocks_to_markdown(resolver, blocks);
        if !markdown.trim().is_empty() {
            return markdown;
        }
        tracing::debug!("Rich blocks produced empty text, falling back");
    }
    if let Some(attachments) = raw
        .get("attachments")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
    {
        let markdown = attachments_to_markdown(resolver, attachments);
        if !markdown.trim().is_empty() {
            return markdown;
        }
    }
    let text = raw.get("text").and_then(|v| v.as_str()).unwrap_or_default();
    slack_text_to_markdown(resolver, text)
}

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    tracing::debug!("[EXPORT] message {}", entity.slack_id);
    let raw = entity.raw_data.clone();

    let Some(channel_id) = resolve_channel_id(ctx, entity).await else {
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("No target channel for message"),
        )
        .await;
        return;
    };
    let Some(user_id) = resolve_author_id(ctx, entity).await else {
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("No author (user_id) for message"),
        )
        .await;
        return;
    };

    let file_ids = collect_file_ids(ctx, entity).await;

    let resolver = build_resolver(ctx, entity).await;
    let mut text = build_text(&resolver, &raw);
    if text.trim().is_empty() {
        // A space keeps Mattermost happy for file-only posts; a hyphen makes
        // genuinely empty messages visible
        text = if file_ids.is_empty() { "-".to_string() } else { " ".to_string() };
    }

    let create_at = raw
        .get("ts")
        .and_then(|v| v.as_str())
        .and_then(slack_ts_to_millis)
        .unwrap_or(0);

    // Thread root, when already exported
    let root_id = match db::entities::related_to(&ctx.pool, entity.id, relation::THREAD_OF).await {
        Ok(Some(root)) => root.mattermost_id.filter(|id| !id.is_empty()),
        _ => None,
    };
    if raw.get("thread_ts").is_some() && root_id.is_none() {
        tracing::debug!(
            "Message {} is a reply but root post not found; posting as top-level",
            entity.slack_id
        );
    }

    // Best-effort membership so CreatePost doesn't reject the author
    if let Err(e) = ctx
        .mm
        .post_json(
            &ctx.mm.plugin_route("channel/members"),
            &json!({"channel_id": channel_id, "user_ids": [user_id]}),
        )
        .await
    {
        tracing::debug!("Ensure channel membership failed (non-fatal): {}", e);
    }

    let mut payload = json!({
        "user_id": user_id,
        "channel_id": channel_id,
        "message": text,
        "create_at": create_at,
    });
    if let Some(root_id) = root_id {
        payload["root_id"] = json!(root_id);
    }
    if !file_ids.is_empty() {
        payload["file_ids"] = json!(file_ids);
    }

    let response = match ctx.mm.post_json(&ctx.mm.plugin_route("import"), &payload).await {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if !response.is_created() {
        let error = format!(
            "Plugin import failed: {} {}",
            response.status,
            response.error_text()
        );
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        return;
    }

    match response
        .json()
        .and_then(|v| v.get("post_id").and_then(|id| id.as_str().map(str::to_string)))
    {
        Some(post_id) => {
            set_status(ctx, entity, MappingStatus::Success, Some(&post_id), None).await;
            tracing::debug!("Message exported, post_id={}", post_id);
        }
        None => {
            let error = format!("No post_id in plugin response: {}", response.body);
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_text_prefers_blocks() {
        let resolver = MentionResolver::default();
        let raw = json!({
            "text": "fallback text",
            "blocks": [{"type": "section", "text": {"type": "plain_text", "text": "from blocks"}}]
        });
        assert_eq!(build_text(&resolver, &raw), "from blocks");
    }

    #[test]
    fn test_build_text_attachment_fallback() {
        let resolver = MentionResolver::default();
        let raw = json!({
            "text": "plain",
            "attachments": [{"title": "Alert"}]
        });
        assert_eq!(build_text(&resolver, &raw), "**Alert**");
    }

    #[test]
    fn test_build_text_plain_markup() {
        let resolver = MentionResolver::default();
        let raw = json!({"text": "see <https://example.com>"});
        assert_eq!(build_text(&resolver, &raw), "see https://example.com");
    }
}
