//! Reaction parsing
//!
//! Slack stores reactions inline on messages as `{name, users: [...]}`. One
//! entity is created per (message, emoji, reacting user) with a composite
//! Slack id, so each reaction can be exported and retried independently.

use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::models::entity::relation;
use crate::models::{EntityType, ImportStage, MappingStatus};

use super::ProgressReporter;

const BATCH_SIZE: u64 = 100;

/// Parse reactions from every mapped folder's daily files
pub async fn parse_reactions(
    pool: &SqlitePool,
    extract_dir: &Path,
    folder_map: &HashMap<String, serde_json::Value>,
    progress: &ProgressReporter,
) -> Result<u64> {
    let job_id = Some(progress.job_id());
    let mut saved = 0u64;
    let mut pending_batch = 0u64;

    for folder in folder_map.keys() {
        let folder_path = extract_dir.join(folder);
        if !folder_path.is_dir() {
            continue;
        }
        for msg_file in super::daily_message_files(&folder_path) {
            let messages = match super::read_json_array(&msg_file) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!("Error reading {}: {}", msg_file.display(), e);
                    continue;
                }
            };

            for message in &messages {
                let Some(ts) = message.get("ts").and_then(|v| v.as_str()) else {
                    continue;
                };
                let reactions = message
                    .get("reactions")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                let message_entity =
                    db::entities::find_scoped(pool, EntityType::Message, ts, job_id).await?;

                for reaction in &reactions {
                    let Some(name) = reaction.get("name").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let users = reaction
                        .get("users")
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();

                    for user in users.iter().filter_map(|v| v.as_str()) {
                        let slack_id = format!("{ts}_{name}_{user}");

                        // Denormalized convenience fields for export-time lookups
                        let mut raw = reaction.clone();
                        if let Some(obj) = raw.as_object_mut() {
                            obj.insert("user".into(), serde_json::json!(user));
                            obj.insert("message_ts".into(), serde_json::json!(ts));
                            obj.insert("emoji_name".into(), serde_json::json!(name));
                            obj.insert(
                                "composite_id".into(),
                                serde_json::json!(format!("{ts}_{name}")),
                            );
                        }

                        let reaction_id = db::entities::insert_or_get(
                            pool,
                            EntityType::Reaction,
                            &slack_id,
                            &raw,
                            MappingStatus::Pending,
                            job_id,
                        )
                        .await?;

                        if let Some(user_entity) =
                            db::entities::find_by_slack_id(pool, EntityType::User, user).await?
                        {
                            db::entities::add_relation(
                                pool,
                                user_entity.id,
                                reaction_id,
                                relation::REACTED_BY,
                                job_id,
                            )
                            .await?;
                        }
                        if let Some(message_entity) = &message_entity {
                            db::entities::add_relation(
                                pool,
                                reaction_id,
                                message_entity.id,
                                relation::REACTED_TO,
                                job_id,
                            )
                            .await?;
                        }

                        saved += 1;
                        pending_batch += 1;
                        if pending_batch == BATCH_SIZE {
                            progress
                                .add(
                                    ImportStage::Reactions,
                                    EntityType::Reaction,
                                    "reactions_processed",
                                    pending_batch,
                                )
                                .await?;
                            pending_batch = 0;
                        }
                    }
                }
            }
        }
    }

    if pending_batch > 0 {
        progress
            .add(
                ImportStage::Reactions,
                EntityType::Reaction,
                "reactions_processed",
                pending_batch,
            )
            .await?;
    }

    tracing::info!("Reactions imported: {}", saved);
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smsync_common::events::EventBus;

    #[tokio::test]
    async fn test_one_entity_per_reacting_user() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("general")).unwrap();
        std::fs::write(
            dir.path().join("general/2024-01-01.json"),
            json!([{
                "ts": "1.0",
                "text": "hello",
                "reactions": [
                    {"name": "tada", "users": ["U1", "U2"], "count": 2},
                    {"name": "eyes", "users": ["U1"], "count": 1}
                ]
            }])
            .to_string(),
        )
        .unwrap();

        let job_id = db::jobs::create_job(&pool, &Default::default()).await.unwrap();
        db::entities::insert_or_get(
            &pool,
            EntityType::Message,
            "1.0",
            &json!({"ts": "1.0"}),
            MappingStatus::Pending,
            Some(job_id),
        )
        .await
        .unwrap();
        db::entities::insert_or_get(
            &pool,
            EntityType::User,
            "U1",
            &json!({"id": "U1"}),
            MappingStatus::Pending,
            None,
        )
        .await
        .unwrap();

        let mut map = HashMap::new();
        map.insert("general".to_string(), json!({"id": "C1"}));
        let progress = ProgressReporter::new(pool.clone(), EventBus::new(16), job_id);

        let saved = parse_reactions(&pool, dir.path(), &map, &progress).await.unwrap();
        assert_eq!(saved, 3);

        let reaction = db::entities::find_scoped(
            &pool,
            EntityType::Reaction,
            "1.0_tada_U1",
            Some(job_id),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reaction.raw_data["emoji_name"], "tada");
        assert_eq!(reaction.raw_data["message_ts"], "1.0");

        let target = db::entities::related_to(&pool, reaction.id, relation::REACTED_TO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target.slack_id, "1.0");

        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        assert_eq!(job.meta.reactions_processed, 3);
    }
}
