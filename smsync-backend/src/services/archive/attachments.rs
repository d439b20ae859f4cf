//! Attachment parsing
//!
//! Only files hosted on Slack's file servers are migrated; external links
//! and integrations keep their original URLs inside the message text.

use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::models::entity::relation;
use crate::models::{EntityType, ImportStage, MappingStatus};

use super::ProgressReporter;

const SLACK_FILES_PREFIX: &str = "https://files.slack.com";

/// Parse Slack-hosted file attachments from every mapped folder
pub async fn parse_attachments(
    pool: &SqlitePool,
    extract_dir: &Path,
    folder_map: &HashMap<String, serde_json::Value>,
    progress: &ProgressReporter,
) -> Result<u64> {
    let job_id = Some(progress.job_id());
    let mut saved = 0u64;

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
                let files = message
                    .get("files")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                if files.is_empty() {
                    continue;
                }

                let message_entity =
                    db::entities::find_scoped(pool, EntityType::Message, ts, job_id).await?;

                for file in &files {
                    let Some(slack_id) = file.get("id").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let hosted = file
                        .get("url_private")
                        .and_then(|v| v.as_str())
                        .map(|url| url.starts_with(SLACK_FILES_PREFIX))
                        .unwrap_or(false);
                    if !hosted {
                        continue;
                    }

                    let attachment_id = db::entities::insert_or_get(
                        pool,
                        EntityType::Attachment,
                        slack_id,
                        file,
                        MappingStatus::Pending,
                        job_id,
                    )
                    .await?;

                    if let Some(message_entity) = &message_entity {
                        db::entities::add_relation(
                            pool,
                            attachment_id,
                            message_entity.id,
                            relation::ATTACHED_TO,
                            job_id,
                        )
                        .await?;
                    }

                    saved += 1;
                    progress
                        .add(
                            ImportStage::Attachments,
                            EntityType::Attachment,
                            "attachments_processed",
                            1,
                        )
                        .await?;
                }
            }
        }
    }

    tracing::info!("Attachments imported: {}", saved);
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smsync_common::events::EventBus;

    #[tokio::test]
    async fn test_only_slack_hosted_files_become_entities() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("general")).unwrap();
        std::fs::write(
            dir.path().join("general/2024-01-01.json"),
            json!([{
                "ts": "1.0",
                "files": [
                    {"id": "F1", "name": "report.pdf", "url_private": "https://files.slack.com/files-pri/T1-F1/report.pdf"},
                    {"id": "F2", "name": "external", "url_private": "https://drive.example.com/doc"},
                    {"name": "no id", "url_private": "https://files.slack.com/x"}
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

        let mut map = HashMap::new();
        map.insert("general".to_string(), json!({"id": "C1"}));
        let progress = ProgressReporter::new(pool.clone(), EventBus::new(16), job_id);

        let saved = parse_attachments(&pool, dir.path(), &map, &progress).await.unwrap();
        assert_eq!(saved, 1);

        let attachment = db::entities::find_scoped(&pool, EntityType::Attachment, "F1", Some(job_id))
            .await
            .unwrap()
            .unwrap();
        let message = db::entities::related_to(&pool, attachment.id, relation::ATTACHED_TO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.slack_id, "1.0");

        assert!(db::entities::find_scoped(&pool, EntityType::Attachment, "F2", Some(job_id))
            .await
            .unwrap()
            .is_none());
    }
}
