//! Channel export
//!
//! Regular channels are created through the importer plugin (which
//! normalizes names); direct and group messages go through the plugin's
//! `/dm` and `/gdm` routes, which create-or-get so re-exports converge on
//! the same conversation.

use serde_json::{json, Value};

use crate::models::{Entity, MappingStatus};

use super::text::sanitize_display_name;
use super::{resolve_mm_user_ids, set_status, ExportContext};

fn raw_members(raw: &Value) -> Vec<String> {
    raw.get("members")
        .and_then(|v| v.as_array())
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn is_dm(raw: &Value) -> bool {
    raw.get("id")
        .and_then(|v| v.as_str())
        .map(|id| id.starts_with('D'))
        .unwrap_or(false)
}

fn is_group_dm(raw: &Value) -> bool {
    if raw.get("is_mpim").and_then(|v| v.as_bool()).unwrap_or(false) {
        return true;
    }
    // Older exports mark group DMs only by the mpdm- name prefix
    raw.get("name")
        .and_then(|v| v.as_str())
        .map(|name| name.starts_with("mpdm-"))
        .unwrap_or(false)
}

fn is_private(raw: &Value) -> bool {
    raw.get("id")
        .and_then(|v| v.as_str())
        .map(|id| id.starts_with('G'))
        .unwrap_or(false)
}

fn channel_id_from(response_body: Option<Value>) -> Option<String> {
    let body = response_body?;
    body.get("channel_id")
        .or_else(|| body.get("id"))
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Create a direct or group conversation through the plugin
async fn export_conversation(
    ctx: &ExportContext,
    entity: &Entity,
    route: &str,
    min_members: usize,
    exact_members: Option<usize>,
) {
    let members = raw_members(&entity.raw_data);
    let mm_user_ids = resolve_mm_user_ids(ctx, &members).await;

    let count_ok = match exact_members {
        Some(exact) => mm_user_ids.len() == exact,
        None => mm_user_ids.len() >= min_members,
    };
    if !count_ok {
        tracing::warn!(
            "Skipping {} {}: resolved {} members",
            route,
            entity.slack_id,
            mm_user_ids.len()
        );
        let error = match exact_members {
            Some(_) => "Invalid DM members count",
            None => "Insufficient GDM members",
        };
        set_status(ctx, entity, MappingStatus::Skipped, None, Some(error)).await;
        return;
    }

    let response = match ctx
        .mm
        .post_json(&ctx.mm.plugin_route(route), &json!({"user_ids": mm_user_ids}))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if !response.is_created() {
        tracing::error!(
            "Plugin {} creation failed for {}: {} {}",
            route,
            entity.slack_id,
            response.status,
            response.error_text()
        );
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&response.error_text())).await;
        return;
    }

    match channel_id_from(response.json()) {
        Some(channel_id) => {
            set_status(ctx, entity, MappingStatus::Success, Some(&channel_id), None).await;
            tracing::debug!("{} channel ready, id: {}", route, channel_id);
        }
        None => {
            let error = format!("Plugin invalid JSON for {}: {}", route, response.status);
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        }
    }
}

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    tracing::debug!("[EXPORT] channel {}", entity.slack_id);
    let raw = entity.raw_data.clone();

    if is_dm(&raw) {
        export_conversation(ctx, entity, "dm", 2, Some(2)).await;
        return;
    }
    if is_group_dm(&raw) {
        export_conversation(ctx, entity, "gdm", 2, None).await;
        return;
    }

    // Regular channels need a name
    let Some(channel_name) = raw.get("name").and_then(|v| v.as_str()) else {
        tracing::error!("No name for channel {}", entity.slack_id);
        set_status(
            ctx,
            entity,
            MappingStatus::Failed,
            None,
            Some("No channel name found in raw_data for non-DM channel"),
        )
        .await;
        return;
    };

    let team_id = ctx.mm.team_id().await;
    let display_fallback = channel_name.replace('-', " ");
    let display_name = sanitize_display_name(
        raw.get("name").and_then(|v| v.as_str()),
        &display_fallback,
    );

    let mut payload = json!({
        "team_id": team_id,
        "name": channel_name,
        "display_name": display_name,
        "type": if is_private(&raw) { "P" } else { "O" },
    });
    if let Some(purpose) = raw
        .get("purpose")
        .and_then(|p| p.get("value"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        payload["purpose"] = json!(purpose);
    }
    if let Some(header) = raw
        .get("topic")
        .and_then(|t| t.get("value"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        payload["header"] = json!(header);
    }

    let response = match ctx.mm.post_json(&ctx.mm.plugin_route("channel"), &payload).await {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if !response.is_created() {
        tracing::error!(
            "Plugin channel creation failed: {} {}",
            response.status,
            response.error_text()
        );
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&response.error_text())).await;
        return;
    }

    let Some(channel_id) = channel_id_from(response.json()) else {
        let error = format!("Plugin invalid JSON for channel: {}", response.status);
        set_status(ctx, entity, MappingStatus::Failed, None, Some(&error)).await;
        return;
    };

    // Membership: resolved members join the team first, then the channel
    let members = raw_members(&raw);
    if !members.is_empty() {
        let mm_user_ids = resolve_mm_user_ids(ctx, &members).await;
        if !mm_user_ids.is_empty() {
            for user_id in &mm_user_ids {
                ctx.mm.ensure_team_member(user_id).await;
            }
            match ctx
                .mm
                .post_json(
                    &ctx.mm.plugin_route("channel/members"),
                    &json!({"channel_id": channel_id, "user_ids": mm_user_ids}),
                )
                .await
            {
                Ok(response) if !response.is_created() => {
                    tracing::error!(
                        "Failed to add members: {} {}",
                        response.status,
                        response.error_text()
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to add members: {}", e),
            }
        }
    }

    // Mirror Slack's archived flag
    if raw.get("is_archived").and_then(|v| v.as_bool()).unwrap_or(false) {
        match ctx
            .mm
            .post_json(
                &ctx.mm.plugin_route("channel/archive"),
                &json!({"channel_id": channel_id}),
            )
            .await
        {
            Ok(response) if !response.is_created() => {
                tracing::error!(
                    "Failed to archive channel: {} {}",
                    response.status,
                    response.error_text()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to archive channel: {}", e),
        }
    }

    set_status(ctx, entity, MappingStatus::Success, Some(&channel_id), None).await;
    tracing::debug!("Channel {} exported, id: {}", channel_name, channel_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_detection() {
        assert!(is_dm(&json!({"id": "D123"})));
        assert!(!is_dm(&json!({"id": "C123"})));

        assert!(is_group_dm(&json!({"id": "G1", "is_mpim": true})));
        assert!(is_group_dm(&json!({"id": "G1", "name": "mpdm-a--b--c-1"})));
        assert!(!is_group_dm(&json!({"id": "G1", "name": "private-stuff"})));

        assert!(is_private(&json!({"id": "G123"})));
        assert!(!is_private(&json!({"id": "C123"})));
    }

    #[test]
    fn test_channel_id_extraction() {
        assert_eq!(
            channel_id_from(Some(json!({"channel_id": "mm1"}))).as_deref(),
            Some("mm1")
        );
        assert_eq!(channel_id_from(Some(json!({"id": "mm2"}))).as_deref(), Some("mm2"));
        assert_eq!(channel_id_from(Some(json!({"ok": true}))), None);
        assert_eq!(channel_id_from(None), None);
    }

    #[test]
    fn test_raw_members() {
        assert_eq!(
            raw_members(&json!({"members": ["U1", "U2"]})),
            vec!["U1".to_string(), "U2".to_string()]
        );
        assert!(raw_members(&json!({})).is_empty());
    }
}
