//! User parsing from users.json

use smsync_common::Result;
use sqlx::SqlitePool;

use crate::db;
use crate::models::{EntityType, MappingStatus};

/// Parse users.json into `user` entities (pending export).
///
/// A missing manifest is not an error: some exports carry no user list and
/// the pipeline proceeds with what it has.
pub async fn parse_users(pool: &SqlitePool, extract_dir: &std::path::Path) -> Result<u64> {
    let users_path = extract_dir.join("users.json");
    if !users_path.exists() {
        tracing::error!("users.json not found in {}", extract_dir.display());
        return Ok(0);
    }

    let users = super::read_json_array(&users_path)?;
    tracing::info!("Found {} users", users.len());

    let mut saved = 0u64;
    for user in &users {
        let Some(slack_id) = user.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        db::entities::insert_or_get(
            pool,
            EntityType::User,
            slack_id,
            user,
            MappingStatus::Pending,
            None,
        )
        .await?;
        saved += 1;
    }

    tracing::info!("User import finished, {} processed", saved);
    Ok(saved)
}
