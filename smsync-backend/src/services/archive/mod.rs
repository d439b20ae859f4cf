//! Slack export archive intake
//!
//! Parses an uploaded Slack export zip into the entity mapping store, one
//! stage at a time: users, channels, messages, custom emojis, reactions,
//! attachments. Each parser re-streams the daily message files it needs so
//! no stage holds the whole archive in memory.

pub mod attachments;
pub mod channels;
pub mod emojis;
pub mod messages;
pub mod orchestrator;
pub mod reactions;
pub mod storage;
pub mod users;
pub mod zip;

pub use orchestrator::ImportOrchestrator;

use chrono::Utc;
use smsync_common::events::{EventBus, SyncEvent};
use smsync_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;
use crate::models::{EntityType, ImportStage};

/// Read a JSON file expected to hold an array of objects
pub(crate) fn read_json_array(path: &Path) -> Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        _ => Err(smsync_common::Error::Archive(format!(
            "{} is not a JSON array",
            path.display()
        ))),
    }
}

/// Daily message files inside one channel folder, sorted for determinism
pub(crate) fn daily_message_files(folder: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = match std::fs::read_dir(folder) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file() && p.extension().map(|ext| ext == "json").unwrap_or(false)
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// Progress reporting shared by the stage parsers
///
/// Counter writes go through single-statement merges in `db::jobs`; each
/// write also mirrors onto the event bus for connected SSE clients.
#[derive(Clone)]
pub struct ProgressReporter {
    pool: SqlitePool,
    bus: EventBus,
    job_id: i64,
}

impl ProgressReporter {
    pub fn new(pool: SqlitePool, bus: EventBus, job_id: i64) -> Self {
        Self { pool, bus, job_id }
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    /// Add to a per-entity processed counter
    pub async fn add(
        &self,
        stage: ImportStage,
        entity_type: EntityType,
        counter_key: &str,
        delta: u64,
    ) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        db::jobs::increment_meta_counter(&self.pool, self.job_id, counter_key, delta).await?;
        self.bus.emit_lossy(SyncEvent::JobProgress {
            job_id: self.job_id,
            stage: stage.as_str().to_string(),
            entity_type: entity_type.as_str().to_string(),
            processed_delta: delta,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Add to the processed JSON file counter
    pub async fn add_files(&self, delta: u64) -> Result<()> {
        db::jobs::increment_meta_counter(&self.pool, self.job_id, "json_files_processed", delta)
            .await
    }
}
