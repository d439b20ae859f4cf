//! User export
//!
//! Creates Mattermost accounts over the core REST API. Accounts are created
//! with the gitlab auth service and a deterministic auth_data value so the
//! instance never emails password resets to migrated users. Existing
//! accounts (matched by email or username) are adopted rather than
//! duplicated.

use serde_json::{json, Value};

use crate::models::{Entity, MappingStatus};

use super::{set_status, ExportContext};

/// Deterministic auth_data for the gitlab auth service: a 31-multiplier
/// string hash reduced to five digits
pub(crate) fn calc_auth_data(username: &str) -> String {
    let mut hash: u32 = 0;
    for ch in username.chars() {
        hash = hash.wrapping_mul(31).wrapping_add(ch as u32);
    }
    format!("{}", hash % 100_000)
}

fn avatar_url(raw: &Value) -> Option<String> {
    let profile = raw.get("profile")?;
    for key in [
        "image_original",
        "image_1024",
        "image_512",
        "image_192",
        "image_72",
        "image_48",
        "image_32",
        "image_24",
    ] {
        if let Some(url) = profile.get(key).and_then(|v| v.as_str()) {
            if !url.contains("secure.gravatar.com") {
                return Some(url.to_string());
            }
        }
    }
    None
}

fn build_payload(entity: &Entity) -> Value {
    let raw = &entity.raw_data;
    let profile = raw.get("profile").cloned().unwrap_or_else(|| json!({}));
    let username = raw
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&entity.slack_id)
        .to_string();
    let email = profile
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{username}@example.com"));

    let mut payload = json!({
        "username": username,
        "email": email,
        "password": "",
        "first_name": profile.get("first_name").and_then(|v| v.as_str()).unwrap_or(""),
        "last_name": profile.get("last_name").and_then(|v| v.as_str()).unwrap_or(""),
        "position": profile.get("title").and_then(|v| v.as_str()).unwrap_or(""),
        "locale": raw.get("locale")
            .or_else(|| profile.get("locale"))
            .and_then(|v| v.as_str())
            .unwrap_or(""),
        "props": raw.get("props").cloned().unwrap_or_else(|| json!({})),
        "notify_props": {"email": "false"},
        "auth_service": "gitlab",
        "auth_data": calc_auth_data(&username),
    });
    if let Some(tz) = raw.get("tz").and_then(|v| v.as_str()) {
        payload["timezone"] = json!({"automaticTimezone": tz});
    }
    payload
}

async fn upload_avatar(ctx: &ExportContext, mm_user_id: &str, url: &str) {
    let image = match ctx.slack.download(url).await {
        Ok(response) if response.is_success() => response.body,
        Ok(response) => {
            tracing::error!("Failed to download avatar {}: status {}", url, response.status);
            return;
        }
        Err(e) => {
            tracing::error!("Failed to download avatar {}: {}", url, e);
            return;
        }
    };

    let part = match reqwest::multipart::Part::bytes(image)
        .file_name("avatar.png")
        .mime_str("image/png")
    {
        Ok(part) => part,
        Err(e) => {
            tracing::error!("Avatar part build failed: {}", e);
            return;
        }
    };
    let form = reqwest::multipart::Form::new().part("image", part);

    match ctx
        .mm
        .post_multipart(&format!("/api/v4/users/{mm_user_id}/image"), form)
        .await
    {
        Ok(response) if response.is_success() => {
            tracing::debug!("Avatar uploaded for user {}", mm_user_id);
        }
        Ok(response) => {
            tracing::error!(
                "Avatar upload for {} failed: {} {}",
                mm_user_id,
                response.status,
                response.error_text()
            );
        }
        Err(e) => {
            tracing::error!("Avatar upload for {} failed: {}", mm_user_id, e);
        }
    }
}

async fn adopt(ctx: &ExportContext, entity: &Entity, mm_user_id: String) {
    set_status(ctx, entity, MappingStatus::Success, Some(&mm_user_id), None).await;
    if let Some(url) = avatar_url(&entity.raw_data) {
        upload_avatar(ctx, &mm_user_id, &url).await;
    }
}

pub async fn export(ctx: &ExportContext, entity: &Entity) {
    tracing::debug!("[EXPORT] user {}", entity.slack_id);
    let payload = build_payload(entity);

    let response = match ctx.mm.post_json("/api/v4/users", &payload).await {
        Ok(response) => response,
        Err(e) => {
            set_status(ctx, entity, MappingStatus::Failed, None, Some(&e.to_string())).await;
            return;
        }
    };

    if response.status == 201 {
        if let Some(id) = response.json().and_then(|v| v["id"].as_str().map(str::to_string)) {
            adopt(ctx, entity, id).await;
            return;
        }
    }

    let body = response.json().unwrap_or_default();
    let error_id = body.get("id").and_then(|v| v.as_str()).unwrap_or("");

    // The instance already knows this account: look it up and adopt
    let lookup_path = match error_id {
        "app.user.save.email_exists.app_error" => Some(format!(
            "/api/v4/users/email/{}",
            payload["email"].as_str().unwrap_or_default()
        )),
        "app.user.save.username_exists.app_error" => Some(format!(
            "/api/v4/users/username/{}",
            payload["username"].as_str().unwrap_or_default()
        )),
        _ => None,
    };

    if let Some(path) = lookup_path {
        if let Ok(lookup) = ctx.mm.get(&path).await {
            if lookup.is_success() {
                if let Some(id) = lookup.json().and_then(|v| v["id"].as_str().map(str::to_string)) {
                    adopt(ctx, entity, id).await;
                    return;
                }
            }
        }
    }

    let message = body
        .get("message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| response.body.clone());
    tracing::error!("User export failed for {}: {}", entity.slack_id, message);
    set_status(ctx, entity, MappingStatus::Failed, None, Some(&message)).await;
}
