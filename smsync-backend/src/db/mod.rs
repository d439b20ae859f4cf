//! Database access for the smsync backend
//!
//! One SQLite database holds the job registry and the universal entity
//! mapping store. Reads from the HTTP handlers and writes from the pipelines
//! share the same pool; statements are kept short so the 3-second dashboard
//! poll never waits on pipeline work.

pub mod entities;
pub mod jobs;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Connects to the database file (created when missing) and bootstraps the
/// schema.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Connect to an in-memory database (tests)
///
/// Capped at one connection: every pooled `:memory:` connection would
/// otherwise open its own empty database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create backend tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            status TEXT NOT NULL DEFAULT 'queued',
            current_stage TEXT,
            meta TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            slack_id TEXT NOT NULL,
            mattermost_id TEXT,
            raw_data TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            job_id INTEGER REFERENCES import_jobs(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup boundary: one row per (type, slack_id) within a job scope.
    // Globally-scoped types store NULL job_id, folded to -1 for uniqueness.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_type_slack_job
            ON entities(entity_type, slack_id, COALESCE(job_id, -1))
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_entities_type_status
            ON entities(entity_type, status)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_entities_job
            ON entities(job_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_relations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            to_entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            job_id INTEGER,
            raw_data TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_relations_from
            ON entity_relations(from_entity_id, relation_type)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_relations_to
            ON entity_relations(to_entity_id, relation_type)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (import_jobs, entities, entity_relations)");

    Ok(())
}
