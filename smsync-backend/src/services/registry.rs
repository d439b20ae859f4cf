//! Job registry read path
//!
//! `GET /jobs` serves decorated job views: raw rows plus the derivations the
//! dashboard needs every 3 seconds. All backfills are read-only and
//! best-effort; a failed derivation serves the stored values instead of an
//! error.
//!
//! - `json_files_total` backfills from the extraction dir while it exists,
//!   else from the uploaded zip's central directory.
//! - `meta.totals` backfills from per-job entity counts when the pre-count
//!   hasn't landed (or landed all-zero).
//! - Processed counters merge with derived non-pending counts: max() during
//!   import stages so displayed progress never regresses, derived-only
//!   during exporting/done so the bar restarts once at export start.

use chrono::{DateTime, Utc};
use serde::Serialize;
use smsync_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

use crate::db;
use crate::models::{ImportJob, ImportStage, JobMeta, JobStatus, JobTotals};
use crate::progress::job_percent;
use crate::services::archive::zip;

/// Serialized job record for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: i64,
    pub status: JobStatus,
    pub current_stage: Option<ImportStage>,
    pub meta: JobMeta,
    pub error_message: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Display percentage, clamped to [1,100]
    pub percent: u8,
}

/// List jobs, most recent first, fully decorated
pub async fn job_views(pool: &SqlitePool, limit: i64) -> Result<Vec<JobView>> {
    let jobs = db::jobs::list_jobs(pool, limit).await?;
    let mut views = Vec::with_capacity(jobs.len());
    for job in jobs {
        views.push(decorate_job(pool, job).await);
    }
    Ok(views)
}

/// Decorate one job row with derived totals, merged counters and percent
pub async fn decorate_job(pool: &SqlitePool, job: ImportJob) -> JobView {
    let mut meta = job.meta.clone();
    let in_import_stage = job
        .current_stage
        .map(|stage| stage.is_import_stage())
        .unwrap_or(false);

    if in_import_stage && meta.json_files_total.unwrap_or(0) == 0 {
        backfill_file_total(&mut meta).await;
    }

    backfill_totals(pool, job.id, &mut meta).await;
    merge_processed_counters(pool, job.id, in_import_stage, &mut meta).await;

    let percent = job_percent(job.status, job.current_stage, &meta);

    JobView {
        id: job.id,
        status: job.status,
        current_stage: job.current_stage,
        meta,
        error_message: job.error_message,
        created_at: job.created_at,
        updated_at: job.updated_at,
        percent,
    }
}

/// File totals from the extraction dir, else from the zip itself
async fn backfill_file_total(meta: &mut JobMeta) {
    if let Some(extract_dir) = meta.extract_dir.as_deref() {
        let dir = Path::new(extract_dir);
        if dir.is_dir() {
            if let Ok((total, _)) = zip::count_json_files_in_dir(dir) {
                meta.json_files_total = Some(total);
                return;
            }
        }
    }
    if let Some(zip_path) = meta.zip_path.as_deref() {
        let path = Path::new(zip_path);
        if path.exists() {
            match zip::count_json_files_in_zip(path).await {
                Ok(total) if total > 0 => meta.json_files_total = Some(total),
                Ok(_) => {}
                Err(e) => tracing::debug!("Zip scan for file totals failed: {}", e),
            }
        }
    }
}

/// Entity totals from per-job counts when the pre-count is missing/empty
async fn backfill_totals(pool: &SqlitePool, job_id: i64, meta: &mut JobMeta) {
    let needs_totals = meta
        .totals
        .map(|t| t.is_effectively_empty())
        .unwrap_or(true);
    if !needs_totals {
        return;
    }

    match db::entities::counts_by_type(pool, job_id).await {
        Ok(derived) => {
            // Emojis stay as recorded: custom emojis are global rows, a
            // per-job count would always read zero
            let emojis = meta.totals.map(|t| t.emojis).unwrap_or(0);
            meta.totals = Some(JobTotals {
                messages: derived.get("message").copied().unwrap_or(0),
                reactions: derived.get("reaction").copied().unwrap_or(0),
                attachments: derived.get("attachment").copied().unwrap_or(0),
                emojis,
            });
        }
        Err(e) => tracing::debug!("Totals derivation failed for job {}: {}", job_id, e),
    }
}

/// Merge stored counters with counts derived from entity statuses
async fn merge_processed_counters(
    pool: &SqlitePool,
    job_id: i64,
    in_import_stage: bool,
    meta: &mut JobMeta,
) {
    let derived = match db::entities::nonpending_counts_by_type(pool, job_id).await {
        Ok(derived) => derived,
        Err(e) => {
            tracing::debug!("Processed derivation failed for job {}: {}", job_id, e);
            return;
        }
    };
    let messages = derived.get("message").copied().unwrap_or(0);
    let reactions = derived.get("reaction").copied().unwrap_or(0);
    let attachments = derived.get("attachment").copied().unwrap_or(0);

    if in_import_stage {
        meta.messages_processed = meta.messages_processed.max(messages);
        meta.reactions_processed = meta.reactions_processed.max(reactions);
        meta.attachments_processed = meta.attachments_processed.max(attachments);
    } else {
        // Export and done reflect actually-exported items only
        meta.messages_processed = messages;
        meta.reactions_processed = reactions;
        meta.attachments_processed = attachments;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, MappingStatus};
    use serde_json::json;

    async fn seed_job(pool: &SqlitePool, stage: ImportStage) -> i64 {
        let job_id = db::jobs::create_job(pool, &JobMeta::default()).await.unwrap();
        db::jobs::set_stage(pool, job_id, stage).await.unwrap();
        job_id
    }

    #[tokio::test]
    async fn test_totals_backfilled_from_entities() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let job_id = seed_job(&pool, ImportStage::Messages).await;

        for i in 0..4 {
            db::entities::insert_or_get(
                &pool,
                EntityType::Message,
                &format!("{i}.0"),
                &json!({}),
                MappingStatus::Pending,
                Some(job_id),
            )
            .await
            .unwrap();
        }

        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        let view = decorate_job(&pool, job).await;
        assert_eq!(view.meta.totals.unwrap().messages, 4);
    }

    #[tokio::test]
    async fn test_import_merge_never_regresses() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let job_id = seed_job(&pool, ImportStage::Messages).await;

        // Stored counter ahead of derived state
        db::jobs::increment_meta_counter(&pool, job_id, "messages_processed", 10)
            .await
            .unwrap();

        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        let view = decorate_job(&pool, job).await;
        assert_eq!(view.meta.messages_processed, 10);
    }

    #[tokio::test]
    async fn test_export_stage_uses_derived_only() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let job_id = seed_job(&pool, ImportStage::Exporting).await;

        // Import-phase counter left at 10; only 2 actually exported
        db::jobs::increment_meta_counter(&pool, job_id, "messages_processed", 10)
            .await
            .unwrap();
        for i in 0..3 {
            let id = db::entities::insert_or_get(
                &pool,
                EntityType::Message,
                &format!("{i}.0"),
                &json!({}),
                MappingStatus::Pending,
                Some(job_id),
            )
            .await
            .unwrap();
            if i < 2 {
                db::entities::update_export_result(&pool, id, MappingStatus::Success, None, None)
                    .await
                    .unwrap();
            }
        }

        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        let view = decorate_job(&pool, job).await;
        assert_eq!(view.meta.messages_processed, 2);
    }

    #[tokio::test]
    async fn test_percent_present_and_clamped() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let job_id = seed_job(&pool, ImportStage::Extracting).await;
        let job = db::jobs::get_job(&pool, job_id).await.unwrap().unwrap();
        let view = decorate_job(&pool, job).await;
        assert!(view.percent >= 1 && view.percent <= 100);
    }
}
