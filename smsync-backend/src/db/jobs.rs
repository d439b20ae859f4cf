//! Job registry database operations

use chrono::{DateTime, Utc};
use smsync_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{ImportJob, ImportStage, JobMeta, JobStatus};

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ImportJob> {
    let status_raw: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown job status in database: {status_raw}")))?;

    let stage_raw: Option<String> = row.try_get("current_stage")?;
    let current_stage = stage_raw.as_deref().and_then(ImportStage::parse);

    let meta_raw: Option<String> = row.try_get("meta")?;
    let meta = match meta_raw {
        Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
        _ => JobMeta::default(),
    };

    Ok(ImportJob {
        id: row.try_get("id")?,
        status,
        current_stage,
        meta,
        error_message: row.try_get("error_message")?,
        created_at: parse_ts(row.try_get("created_at").ok()),
        updated_at: parse_ts(row.try_get("updated_at").ok()),
    })
}

/// Create a new job in `running`/`extracting` state, returning its id
pub async fn create_job(pool: &SqlitePool, meta: &JobMeta) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let meta_json = serde_json::to_string(meta)?;

    let result = sqlx::query(
        r#"
        INSERT INTO import_jobs (status, current_stage, meta, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(JobStatus::Running.as_str())
    .bind(ImportStage::Extracting.as_str())
    .bind(&meta_json)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Advance a job to a new pipeline stage
pub async fn set_stage(pool: &SqlitePool, job_id: i64, stage: ImportStage) -> Result<()> {
    sqlx::query("UPDATE import_jobs SET current_stage = ?, updated_at = ? WHERE id = ?")
        .bind(stage.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Mark a job finished (success or failure)
pub async fn set_status(
    pool: &SqlitePool,
    job_id: i64,
    status: JobStatus,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE import_jobs SET status = ?, error_message = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically add `delta` to a numeric meta counter.
///
/// Single-statement JSON merge so concurrent progress callbacks cannot lose
/// updates to each other (the read-modify-write happens inside SQLite).
pub async fn increment_meta_counter(
    pool: &SqlitePool,
    job_id: i64,
    key: &str,
    delta: u64,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    let path = format!("$.{key}");
    sqlx::query(
        r#"
        UPDATE import_jobs
        SET meta = json_set(
                COALESCE(meta, '{}'),
                ?1,
                COALESCE(json_extract(meta, ?1), 0) + ?2
            ),
            updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(&path)
    .bind(delta as i64)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace the whole meta blob.
///
/// Only the single-writer orchestrator fields (paths, totals, stage list)
/// go through here; concurrent counters use [`increment_meta_counter`].
pub async fn save_meta(pool: &SqlitePool, job_id: i64, meta: &JobMeta) -> Result<()> {
    let meta_json = serde_json::to_string(meta)?;
    sqlx::query("UPDATE import_jobs SET meta = ?, updated_at = ? WHERE id = ?")
        .bind(&meta_json)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Load one job by id
pub async fn get_job(pool: &SqlitePool, job_id: i64) -> Result<Option<ImportJob>> {
    let row = sqlx::query("SELECT * FROM import_jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// List jobs, most recent first
pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<ImportJob>> {
    let rows = sqlx::query("SELECT * FROM import_jobs ORDER BY id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

/// Latest job, if any (for the progress stream payload)
pub async fn latest_job(pool: &SqlitePool) -> Result<Option<ImportJob>> {
    let row = sqlx::query("SELECT * FROM import_jobs ORDER BY id DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}
