//! Message parsing from per-channel daily files
//!
//! Messages are persisted file by file with their relations created
//! immediately (channel, author, thread root), so memory stays flat no
//! matter how large the export is.

use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;

use crate::db;
use crate::models::entity::relation;
use crate::models::{EntityType, ImportStage, MappingStatus};

use super::ProgressReporter;

/// Parse all daily message files for every mapped folder.
///
/// Progress is reported in `batch_size` chunks plus one file-counter tick
/// per completed daily file. Returns the number of persisted messages.
pub async fn parse_channel_messages(
    pool: &SqlitePool,
    extract_dir: &Path,
    folder_map: &HashMap<String, serde_json::Value>,
    batch_size: u64,
    progress: &ProgressReporter,
) -> Result<u64> {
    let job_id = Some(progress.job_id());
    let mut saved = 0u64;
    let mut pending_batch = 0u64;

    for (folder, channel) in folder_map {
        let Some(channel_slack_id) = channel.get("id").and_then(|v| v.as_str()) else {
            tracing::debug!("Skipping folder {}: channel has no id", folder);
            continue;
        };
        let channel_entity =
            db::entities::find_by_slack_id(pool, EntityType::Channel, channel_slack_id).await?;

        let folder_path = extract_dir.join(folder);
        if !folder_path.is_dir() {
            tracing::debug!("Skipping {}: not a directory", folder_path.display());
            continue;
        }

        for msg_file in super::daily_message_files(&folder_path) {
            tracing::debug!("Reading message file {}", msg_file.display());
            let messages = match super::read_json_array(&msg_file) {
                Ok(messages) => messages,
                Err(e) => {
                    // One broken daily file must not sink the import
                    tracing::error!("Error reading {}: {}", msg_file.display(), e);
                    continue;
                }
            };

            for message in &messages {
                let Some(ts) = message.get("ts").and_then(|v| v.as_str()) else {
                    continue;
                };

                let message_id = db::entities::insert_or_get(
                    pool,
                    EntityType::Message,
                    ts,
                    message,
                    MappingStatus::Pending,
                    job_id,
                )
                .await?;

                if let Some(channel_entity) = &channel_entity {
                    db::entities::add_relation(
                        pool,
                        message_id,
                        channel_entity.id,
                        relation::POSTED_IN,
                        job_id,
                    )
                    .await?;
                }

                // Author: regular user or bot
                let author = message
                    .get("user")
                    .or_else(|| message.get("bot_id"))
                    .and_then(|v| v.as_str());
                if let Some(author) = author {
                    if let Some(user_entity) =
                        db::entities::find_by_slack_id(pool, EntityType::User, author).await?
                    {
                        db::entities::add_relation(
                            pool,
                            user_entity.id,
                            message_id,
                            relation::POSTED_BY,
                            job_id,
                        )
                        .await?;
                    }
                }

                // Thread replies link to their root when it is already stored
                let thread_ts = message.get("thread_ts").and_then(|v| v.as_str());
                if let Some(thread_ts) = thread_ts.filter(|root| *root != ts) {
                    if let Some(root_entity) =
                        db::entities::find_scoped(pool, EntityType::Message, thread_ts, job_id)
                            .await?
                    {
                        db::entities::add_relation(
                            pool,
                            message_id,
                            root_entity.id,
                            relation::THREAD_OF,
                            job_id,
                        )
                        .await?;
                    }
                }

                saved += 1;
                pending_batch += 1;
                if pending_batch == batch_size {
                    tracing::debug!("Messages saved so far: {}", saved);
                    progress
                        .add(
                            ImportStage::Messages,
                            EntityType::Message,
                            "messages_processed",
                            pending_batch,
                        )
                        .await?;
                    pending_batch = 0;
                }
            }

            progress.add_files(1).await?;
        }
    }

    if pending_batch > 0 {
        progress
            .add(
                ImportStage::Messages,
                EntityType::Message,
                "messages_processed",
                pending_batch,
            )
            .await?;
    }

    tracing::info!("Messages imported: {}", saved);
    Ok(saved)
}
