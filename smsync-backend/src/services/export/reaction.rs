//! Reaction export
//!
//! Mattermost rejects reactions with emoji names it doesn't know, and the
//! standard sets differ from Slack's, so each reaction tries a candidate
//! list (skin tones stripped, aliases mapped). Unknown-emoji failures after
//! all candidates become `skipped`, not `failed`: there is nothing to
//! retry.

use serde_json::json;
use smsync_common::time::slack_ts_to_millis;

use crate::db;
use crate::models::entity::relation;
use crate::models::{Entity, EntityType, MappingStatus};

use super::text::{emoji_candidates, transliterate_cyrillic};
use super::{set_status, ExportContext};

fn is_unknown_emoji_error(error: &str) -> bool {
    // Mattermost phrases this with a typographic apostrophe; match loosely
    error.contains("find the emoji")
}

fn is_duplicate_error(status: u16, error: &str) -> bool {
    let lower = error.to_lowercase();
    status == 409
        || lower.contains("already exists")
        || lower.contains("reaction exists")
        || lower.contains("duplicate")
}

/// The message ts this reaction targets, from denormalized raw fields or
/// the composite slack_id prefix
fn target_ts(entity: &Entity) -> Option<String> {
    let raw = &entity.raw_data;
    if let Some(ts) = raw
        .get("item")
        .and_then(|item| item.get("ts"))
        .and_then(|v| v.as_str())
    {
        return Some(ts.to_string());
    }
    if let Some(ts) = raw.get("message_ts").or_else(|| raw.get("ts")).and_then(|v| v.as_str()) {
        // Older rows stored the composite id here; keep the ts prefix
        return Some(ts.split('_').next().unwrap_or(ts).to_string());
    }
    entity.slack_id.split('_').next().map(str::to_string)
}

/// Resolve the target post id and (for membership) its channel id
async fn resolve_post_and_channel(
    ctx: &ExportContext,
    entity: &Entity,
) -> (Option<String>, Option<String>) {
    let mut message = db::entities::related_to(&ctx.pool, entity.id, relation::REACTED_TO)
        .await
        .ok()
        .flatten()
        .filter(|e| e.entity_type == EntityType::Message);

    if message.is_none() {
        if let Some(ts) = target_ts(entity) {
            message = db::entities::find_scoped(&ctx.pool, EntityType::Message, &ts, ctx.job_id)
                .await
                .ok()
                .flatten();
        }
    }

    let Some(message) = message else {
        return (None, None);
    };
    let Some(post_id) = message.mattermost_id.clone().filter(|id| !id.is_empty()) else {
        return (None, None);
    };

    let channel_id = db::entities::related_to(&ctx.pool, message.id, relation::POSTED_IN)
        .await
        .ok()
        .flatten()
        .and_then(|channel| channel.mattermost_id)
        .filter(|id| !id.is_empty());

    (Some(post_id), channel_id)
}

async fn resolve_reacting_user(ctx: &ExportContext, entity: &Entity) -> Option<String> {
    if let Ok(Some(user)) = db::entities::related_from(&ctx.pool, entity.id, relation::REACTED_BY).await
    {
        if let Some(mm_id) = user.mattermost_id.filter(|id| !id.is_empty()) {
            return Some(mm_id);
        }
    }
    let slack_uid = entity.raw_data.get("user").and_then(|v| v.as_str())?;
    let user = db::entities::find_by_slack_id(&ctx.pool, EntityType::User, slack_uid)
        .await
        .ok()??;
    user.mattermost_id.filter(|id| !id.is_empty())
}

async fn is_custom_emoji(ctx: &ExportContext, name: &str) -> bool {
    matches!(
        db::entities::find_by_slack_id(&ctx.pool, EntityType::CustomEmoji, name).await,
        Ok(Some(_))
    )
}

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    tracing::debug!("[EXPORT] reaction {}", entity.slack_id);
    let raw = &entity.raw_data;

    let (post_id, channel_id) = resolve_post_and_channel(ctx, entity).await;
    let Some(post_id) = post_id else {
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("Target post_id not found for reaction"),
        )
        .await;
        return;
    };

    let Some(user_id) = resolve_reacting_user(ctx, entity).await else {
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("Reacting user not resolved"),
        )
        .await;
        return;
    };

    let emoji_name = raw
        .get("name")
        .or_else(|| raw.get("emoji"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();
    if emoji_name.is_empty() {
        set_status(ctx, entity, MappingStatus::Failed, None, Some("Emoji name missing")).await;
        return;
    }

    let mut candidates = emoji_candidates(&emoji_name);
    // Custom emojis were created under their transliterated names; standard
    // names stay untouched
    if is_custom_emoji(ctx, &candidates[0]).await {
        candidates[0] = transliterate_cyrillic(&candidates[0]);
    }

    // Best-effort membership so AddReaction doesn't reject the user
    if let Some(channel_id) = &channel_id {
        if let Err(e) = ctx
            .mm
            .post_json(
                &ctx.mm.plugin_route("channel/members"),
                &json!({"channel_id": channel_id, "user_ids": [user_id]}),
            )
            .await
        {
            tracing::debug!("Ensure channel membership for reaction failed (non-fatal): {}", e);
        }
    }

    let create_at = raw
        .get("ts")
        .and_then(|v| v.as_str())
        .and_then(slack_ts_to_millis)
        .unwrap_or(0);

    let mut last_error: Option<String> = None;
    for name in &candidates {
        let payload = json!({
            "user_id": user_id,
            "post_id": post_id,
            "emoji_name": name,
            "create_at": create_at,
        });
        let response = match ctx.mm.post_json(&ctx.mm.plugin_route("reaction"), &payload).await {
            Ok(response) => response,
            Err(e) => {
                last_error = Some(e.to_string());
                break;
            }
        };

        if response.is_created() {
            set_status(ctx, entity, MappingStatus::Success, None, None).await;
            return;
        }
        let error = response.error_text();
        if is_duplicate_error(response.status, &error) {
            // Toned variants collapse to the base emoji in Mattermost
            set_status(ctx, entity, MappingStatus::Success, None, None).await;
            return;
        }
        last_error = Some(format!("Plugin reaction failed: {} {}", response.status, error));
        if is_unknown_emoji_error(&error) {
            continue;
        }
        break;
    }

    let last_error = last_error.unwrap_or_else(|| "Unknown error".to_string());
    if is_unknown_emoji_error(&last_error) {
        set_status(ctx, entity, MappingStatus::Skipped, None, Some(&last_error)).await;
    } else {
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&last_error)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity_with(slack_id: &str, raw: serde_json::Value) -> Entity {
        Entity {
            id: 1,
            entity_type: EntityType::Reaction,
            slack_id: slack_id.into(),
            mattermost_id: None,
            raw_data: raw,
            status: MappingStatus::Pending,
            error_message: None,
            job_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_target_ts_sources() {
        let e = entity_with("1.0_tada_U1", json!({"item": {"ts": "9.9"}}));
        assert_eq!(target_ts(&e).as_deref(), Some("9.9"));

        let e = entity_with("1.0_tada_U1", json!({"message_ts": "2.5"}));
        assert_eq!(target_ts(&e).as_deref(), Some("2.5"));

        // Composite value sanitized down to the ts prefix
        let e = entity_with("1.0_tada_U1", json!({"ts": "3.5_tada_U1"}));
        assert_eq!(target_ts(&e).as_deref(), Some("3.5"));

        let e = entity_with("4.5_tada_U1", json!({}));
        assert_eq!(target_ts(&e).as_deref(), Some("4.5"));
    }

    #[test]
    fn test_error_classification() {
        assert!(is_unknown_emoji_error("We couldn't find the emoji"));
        assert!(is_unknown_emoji_error("We couldn’t find the emoji :x:"));
        assert!(!is_unknown_emoji_error("internal error"));

        assert!(is_duplicate_error(409, "whatever"));
        assert!(is_duplicate_error(400, "Reaction exists already"));
        assert!(is_duplicate_error(400, "duplicate entry"));
        assert!(!is_duplicate_error(400, "bad request"));
    }
}
