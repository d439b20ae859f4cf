//! Import workflow orchestrator
//!
//! Drives an uploaded archive through the pipeline stages:
//! extracting → users → channels → messages → emojis → reactions →
//! attachments → exporting → done
//!
//! Each stage boundary is persisted on the job row and mirrored to the
//! event bus. A failure anywhere marks the job failed with the error
//! message; the extraction directory and the uploaded archive are removed
//! in every outcome.

use chrono::Utc;
use smsync_common::events::{EventBus, SyncEvent};
use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::db;
use crate::models::{ImportStage, JobMeta, JobStatus, JobTotals};
use crate::services::export;
use crate::services::slack::SlackClient;

use super::{
    attachments, channels, emojis, messages, reactions, storage, users, zip, ProgressReporter,
};

const MESSAGE_BATCH_SIZE: u64 = 200;

pub struct ImportOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    settings: Arc<Settings>,
    slack: SlackClient,
}

impl ImportOrchestrator {
    pub fn new(db: SqlitePool, event_bus: EventBus, settings: Arc<Settings>) -> Self {
        let slack = SlackClient::new(settings.slack_bot_token.clone());
        Self {
            db,
            event_bus,
            settings,
            slack,
        }
    }

    /// Execute the whole import for an already-created job.
    ///
    /// Spawned from the upload handler; never returns an error to the HTTP
    /// layer, failures land on the job row.
    pub async fn run(&self, job_id: i64, zip_path: PathBuf) {
        let extract_dir = zip::extraction_dir(&self.settings.upload_dir);

        tracing::info!(job_id, zip_path = %zip_path.display(), "Starting import workflow");

        match self.execute(job_id, &zip_path, &extract_dir).await {
            Ok(()) => {
                tracing::info!(job_id, "Import workflow completed");
                self.event_bus.emit_lossy(SyncEvent::JobCompleted {
                    job_id,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Import workflow failed");
                if let Err(db_err) =
                    db::jobs::set_status(&self.db, job_id, JobStatus::Failed, Some(&e.to_string()))
                        .await
                {
                    tracing::error!(job_id, "Failed to record job failure: {}", db_err);
                }
                self.event_bus.emit_lossy(SyncEvent::JobFailed {
                    job_id,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        self.cleanup(job_id, &zip_path, &extract_dir).await;
    }

    async fn execute(&self, job_id: i64, zip_path: &Path, extract_dir: &Path) -> Result<()> {
        let progress = ProgressReporter::new(self.db.clone(), self.event_bus.clone(), job_id);
        let mut stage = ImportStage::Extracting;

        // Persist the extraction dir early so the registry can derive file
        // totals while extraction is still running
        self.update_meta(job_id, |meta| {
            meta.extract_dir = Some(extract_dir.display().to_string());
        })
        .await?;

        zip::extract_zip(zip_path, extract_dir).await?;

        // Workspace emoji list, fetched once per job
        let emoji_list = self.slack.emoji_list().await;

        let (json_total, manifest_presence) = zip::count_json_files_in_dir(extract_dir)?;
        self.update_meta(job_id, |meta| {
            meta.json_files_total = Some(json_total);
        })
        .await?;

        // users
        self.transition(job_id, &mut stage, ImportStage::Users).await?;
        tracing::info!(job_id, "Archive extracted, parsing users");
        users::parse_users(&self.db, extract_dir).await?;
        if manifest_presence.get("users.json").copied().unwrap_or(false) {
            progress.add_files(1).await?;
        }

        // channels
        self.transition(job_id, &mut stage, ImportStage::Channels).await?;
        channels::parse_channels_and_chats(&self.db, extract_dir).await?;
        let channel_manifests = ["channels.json", "groups.json", "dms.json", "mpims.json"]
            .iter()
            .filter(|m| manifest_presence.get(**m).copied().unwrap_or(false))
            .count() as u64;
        progress.add_files(channel_manifests).await?;

        let folder_map = channels::folder_channel_map(extract_dir)?;
        tracing::debug!(job_id, folders = folder_map.len(), "Folder to channel mapping built");

        // Pre-count totals so progress bars have denominators before the
        // heavy stages begin
        let totals = self.pre_count_totals(extract_dir, &folder_map, &emoji_list)?;
        self.update_meta(job_id, |meta| {
            meta.totals = Some(totals);
            meta.stages = Some(JobMeta::stage_names());
        })
        .await?;

        // messages
        self.transition(job_id, &mut stage, ImportStage::Messages).await?;
        messages::parse_channel_messages(
            &self.db,
            extract_dir,
            &folder_map,
            MESSAGE_BATCH_SIZE,
            &progress,
        )
        .await?;

        // emojis
        self.transition(job_id, &mut stage, ImportStage::Emojis).await?;
        emojis::parse_custom_emojis(&self.db, extract_dir, &folder_map, &emoji_list, &progress)
            .await?;

        // reactions
        self.transition(job_id, &mut stage, ImportStage::Reactions).await?;
        reactions::parse_reactions(&self.db, extract_dir, &folder_map, &progress).await?;

        // attachments
        self.transition(job_id, &mut stage, ImportStage::Attachments).await?;
        attachments::parse_attachments(&self.db, extract_dir, &folder_map, &progress).await?;

        // export
        self.transition(job_id, &mut stage, ImportStage::Exporting).await?;
        export::run_export(
            self.db.clone(),
            self.settings.clone(),
            self.event_bus.clone(),
            Some(job_id),
        )
        .await?;

        // done
        self.transition(job_id, &mut stage, ImportStage::Done).await?;
        db::jobs::set_status(&self.db, job_id, JobStatus::Success, None).await?;

        Ok(())
    }

    async fn transition(
        &self,
        job_id: i64,
        current: &mut ImportStage,
        next: ImportStage,
    ) -> Result<()> {
        db::jobs::set_stage(&self.db, job_id, next).await?;
        self.event_bus.emit_lossy(SyncEvent::JobStageChanged {
            job_id,
            old_stage: Some(current.as_str().to_string()),
            new_stage: next.as_str().to_string(),
            timestamp: Utc::now(),
        });
        *current = next;
        Ok(())
    }

    /// Read-modify-write of the single-writer meta fields
    async fn update_meta<F>(&self, job_id: i64, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut JobMeta),
    {
        let Some(job) = db::jobs::get_job(&self.db, job_id).await? else {
            return Ok(());
        };
        let mut meta = job.meta;
        mutate(&mut meta);
        db::jobs::save_meta(&self.db, job_id, &meta).await
    }

    /// One streaming pass over the daily files to pre-count the entity
    /// totals used as progress denominators.
    fn pre_count_totals(
        &self,
        extract_dir: &Path,
        folder_map: &std::collections::HashMap<String, serde_json::Value>,
        emoji_list: &std::collections::HashMap<String, String>,
    ) -> Result<JobTotals> {
        let mut totals = JobTotals::default();
        let mut seen_emoji: HashSet<String> = HashSet::new();

        for folder in folder_map.keys() {
            let folder_path = extract_dir.join(folder);
            if !folder_path.is_dir() {
                continue;
            }
            for msg_file in super::daily_message_files(&folder_path) {
                let messages = match super::read_json_array(&msg_file) {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::error!("Pre-count error in {}: {}", msg_file.display(), e);
                        continue;
                    }
                };
                for message in &messages {
                    totals.messages += 1;

                    for reaction in message
                        .get("reactions")
                        .and_then(|v| v.as_array())
                        .unwrap_or(&vec![])
                    {
                        totals.reactions += reaction
                            .get("users")
                            .and_then(|v| v.as_array())
                            .map(|users| users.len() as u64)
                            .unwrap_or(0);
                    }

                    for file in message.get("files").and_then(|v| v.as_array()).unwrap_or(&vec![]) {
                        let hosted = file
                            .get("url_private")
                            .and_then(|v| v.as_str())
                            .map(|url| url.starts_with("https://files.slack.com"))
                            .unwrap_or(false);
                        if hosted {
                            totals.attachments += 1;
                        }
                    }

                    seen_emoji.extend(emojis::collect_message_shortcodes(message));
                }
            }
        }

        totals.emojis = seen_emoji
            .iter()
            .filter(|name| emojis::resolve_emoji_url(name, emoji_list).is_some())
            .count() as u64;

        Ok(totals)
    }

    async fn cleanup(&self, job_id: i64, zip_path: &Path, extract_dir: &Path) {
        if extract_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(extract_dir).await {
                tracing::error!("Failed to remove extraction dir {}: {}", extract_dir.display(), e);
            } else {
                tracing::debug!("Extraction dir {} removed", extract_dir.display());
            }
        }
        storage::remove_quietly(zip_path).await;

        // Don't leak temp paths through the registry after the job ends
        if let Err(e) = self
            .update_meta(job_id, |meta| {
                meta.extract_dir = None;
            })
            .await
        {
            tracing::error!(job_id, "Failed to clear extract_dir from job meta: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use ::zip::write::FileOptions;

    fn build_export_zip(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = FileOptions::default();

        writer.start_file("users.json", options).unwrap();
        writer
            .write_all(
                json!([
                    {"id": "U1", "name": "alice", "profile": {"email": "alice@example.com"}},
                    {"id": "U2", "name": "bob"}
                ])
                .to_string()
                .as_bytes(),
            )
            .unwrap();

        writer.start_file("channels.json", options).unwrap();
        writer
            .write_all(json!([{"id": "C1", "name": "general"}]).to_string().as_bytes())
            .unwrap();

        writer.start_file("general/2024-01-01.json", options).unwrap();
        writer
            .write_all(
                json!([
                    {"ts": "1.0", "user": "U1", "text": "hello :tada:",
                     "reactions": [{"name": "eyes", "users": ["U2"]}]},
                    {"ts": "2.0", "user": "U2", "text": "with file",
                     "files": [{"id": "F1", "name": "a.txt",
                                "url_private": "https://files.slack.com/a.txt"}]}
                ])
                .to_string()
                .as_bytes(),
            )
            .unwrap();

        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_full_import_without_mattermost() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("export.zip");
        build_export_zip(&zip_path);

        let mut settings = Settings::load(&smsync_common::config::ConfigFile::empty());
        settings.upload_dir = dir.path().to_path_buf();
        settings.mm_url = None;
        settings.mm_token = None;
        settings.slack_bot_token = None;

        let bus = EventBus::new(64);
        let meta = JobMeta {
            zip_path: Some(zip_path.display().to_string()),
            ..Default::default()
        };
        let job_id = db::jobs::create_job(&pool, &meta).await.unwrap();

        let orchestrator = ImportOrchestrator::new(pool.clone(), bus, Arc::new(settings));
        orchestrator.run(job_id, zip_path.clone()).await;

        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        // Export is skipped without MM credentials; the job still completes
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.current_stage, Some(ImportStage::Done));
        assert!(job.meta.extract_dir.is_none());

        let totals = job.meta.totals.unwrap();
        assert_eq!(totals.messages, 2);
        assert_eq!(totals.reactions, 1);
        assert_eq!(totals.attachments, 1);
        // users.json + channels.json + one daily file
        assert_eq!(job.meta.json_files_total, Some(3));
        assert_eq!(job.meta.json_files_processed, 3);
        assert_eq!(job.meta.messages_processed, 2);

        // Uploaded archive and extraction dir are gone
        assert!(!zip_path.exists());

        // Entities landed
        use crate::models::EntityType;
        assert_eq!(
            db::entities::counts_by_type(&pool, job_id).await.unwrap().get("message"),
            Some(&2)
        );
        assert!(db::entities::find_by_slack_id(&pool, EntityType::User, "U1")
            .await
            .unwrap()
            .is_some());
    }
}
