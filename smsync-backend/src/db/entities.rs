//! Entity mapping store operations
//!
//! Inserts are insert-or-get against the `(entity_type, slack_id, job)`
//! uniqueness boundary: re-parsing the same archive never duplicates rows.
//! Job scoping follows the entity type: messages, reactions and attachments
//! are constrained to their job, users/channels/custom emojis are global.

use chrono::{DateTime, Utc};
use smsync_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::models::{Entity, EntityType, MappingStatus};

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    let type_raw: String = row.try_get("entity_type")?;
    let entity_type = EntityType::parse(&type_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown entity type in database: {type_raw}")))?;

    let status_raw: String = row.try_get("status")?;
    let status = MappingStatus::parse(&status_raw)
        .ok_or_else(|| Error::Internal(format!("Unknown mapping status in database: {status_raw}")))?;

    let raw_data: Option<String> = row.try_get("raw_data")?;
    let raw_data = match raw_data {
        Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
        _ => serde_json::Value::Null,
    };

    Ok(Entity {
        id: row.try_get("id")?,
        entity_type,
        slack_id: row.try_get("slack_id")?,
        mattermost_id: row.try_get("mattermost_id")?,
        raw_data,
        status,
        error_message: row.try_get("error_message")?,
        job_id: row.try_get("job_id")?,
        created_at: parse_ts(row.try_get("created_at").ok()),
        updated_at: parse_ts(row.try_get("updated_at").ok()),
    })
}

/// Effective job scope for an entity type (global types store NULL)
fn scope(entity_type: EntityType, job_id: Option<i64>) -> Option<i64> {
    if entity_type.is_job_scoped() {
        job_id
    } else {
        None
    }
}

/// Insert an entity if absent, returning the row id either way
pub async fn insert_or_get(
    pool: &SqlitePool,
    entity_type: EntityType,
    slack_id: &str,
    raw_data: &serde_json::Value,
    status: MappingStatus,
    job_id: Option<i64>,
) -> Result<i64> {
    let job_id = scope(entity_type, job_id);
    let now = Utc::now().to_rfc3339();
    let raw_json = serde_json::to_string(raw_data)?;

    sqlx::query(
        r#"
        INSERT INTO entities (entity_type, slack_id, raw_data, status, job_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(entity_type.as_str())
    .bind(slack_id)
    .bind(&raw_json)
    .bind(status.as_str())
    .bind(job_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        SELECT id FROM entities
        WHERE entity_type = ? AND slack_id = ? AND COALESCE(job_id, -1) = COALESCE(?, -1)
        "#,
    )
    .bind(entity_type.as_str())
    .bind(slack_id)
    .bind(job_id)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Record an export outcome on a mapping row
pub async fn update_export_result(
    pool: &SqlitePool,
    entity_id: i64,
    status: MappingStatus,
    mattermost_id: Option<&str>,
    error_message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE entities
        SET status = ?,
            mattermost_id = COALESCE(?, mattermost_id),
            error_message = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(status.as_str())
    .bind(mattermost_id)
    .bind(error_message)
    .bind(Utc::now().to_rfc3339())
    .bind(entity_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Find a mapping by Slack id, unconstrained by job (exporter lookups)
pub async fn find_by_slack_id(
    pool: &SqlitePool,
    entity_type: EntityType,
    slack_id: &str,
) -> Result<Option<Entity>> {
    let row = sqlx::query("SELECT * FROM entities WHERE entity_type = ? AND slack_id = ? LIMIT 1")
        .bind(entity_type.as_str())
        .bind(slack_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Find a mapping by Slack id within a job scope (message lookups)
pub async fn find_scoped(
    pool: &SqlitePool,
    entity_type: EntityType,
    slack_id: &str,
    job_id: Option<i64>,
) -> Result<Option<Entity>> {
    let job_id = scope(entity_type, job_id);
    let row = sqlx::query(
        r#"
        SELECT * FROM entities
        WHERE entity_type = ? AND slack_id = ? AND COALESCE(job_id, -1) = COALESCE(?, -1)
        LIMIT 1
        "#,
    )
    .bind(entity_type.as_str())
    .bind(slack_id)
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Slack ids already present for a type (import dedup)
pub async fn existing_slack_ids(
    pool: &SqlitePool,
    entity_type: EntityType,
) -> Result<HashSet<String>> {
    let rows: Vec<String> = sqlx::query_scalar("SELECT slack_id FROM entities WHERE entity_type = ?")
        .bind(entity_type.as_str())
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Entities awaiting export for one type, in insertion order
///
/// pending/skipped/failed are retried; success is final.
pub async fn exportable_entities(
    pool: &SqlitePool,
    entity_type: EntityType,
    job_id: Option<i64>,
) -> Result<Vec<Entity>> {
    let rows = if entity_type.is_job_scoped() {
        sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE entity_type = ?
              AND status IN ('pending', 'skipped', 'failed')
              AND COALESCE(job_id, -1) = COALESCE(?, -1)
            ORDER BY id
            "#,
        )
        .bind(entity_type.as_str())
        .bind(job_id)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query(
            r#"
            SELECT * FROM entities
            WHERE entity_type = ?
              AND status IN ('pending', 'skipped', 'failed')
            ORDER BY id
            "#,
        )
        .bind(entity_type.as_str())
        .fetch_all(pool)
        .await?
    };
    rows.iter().map(entity_from_row).collect()
}

/// Entity counts grouped by type, scoped to one job
pub async fn counts_by_type(pool: &SqlitePool, job_id: i64) -> Result<HashMap<String, u64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT entity_type, COUNT(*) FROM entities WHERE job_id = ? GROUP BY entity_type",
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(t, n)| (t, n as u64)).collect())
}

/// Non-pending entity counts grouped by type, scoped to one job
pub async fn nonpending_counts_by_type(
    pool: &SqlitePool,
    job_id: i64,
) -> Result<HashMap<String, u64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT entity_type, COUNT(*) FROM entities
        WHERE job_id = ? AND status != 'pending'
        GROUP BY entity_type
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(t, n)| (t, n as u64)).collect())
}

/// Total entity count across all jobs
pub async fn total_count(pool: &SqlitePool) -> Result<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(pool)
        .await?;
    Ok(n as u64)
}

/// Counts grouped by (type, status) for the stats matrix
pub async fn type_status_counts(pool: &SqlitePool) -> Result<Vec<(String, String, u64)>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT entity_type, status, COUNT(*) FROM entities GROUP BY entity_type, status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(t, s, n)| (t, s, n as u64)).collect())
}

/// Record a relation between two entities
pub async fn add_relation(
    pool: &SqlitePool,
    from_entity_id: i64,
    to_entity_id: i64,
    relation_type: &str,
    job_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO entity_relations (from_entity_id, to_entity_id, relation_type, job_id, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(from_entity_id)
    .bind(to_entity_id)
    .bind(relation_type)
    .bind(job_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Follow a relation forward: the entity this one points at
pub async fn related_to(
    pool: &SqlitePool,
    from_entity_id: i64,
    relation_type: &str,
) -> Result<Option<Entity>> {
    let row = sqlx::query(
        r#"
        SELECT e.* FROM entities e
        JOIN entity_relations r ON e.id = r.to_entity_id
        WHERE r.from_entity_id = ? AND r.relation_type = ?
        LIMIT 1
        "#,
    )
    .bind(from_entity_id)
    .bind(relation_type)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// Follow a relation backward: the entity pointing at this one
pub async fn related_from(
    pool: &SqlitePool,
    to_entity_id: i64,
    relation_type: &str,
) -> Result<Option<Entity>> {
    let row = sqlx::query(
        r#"
        SELECT e.* FROM entities e
        JOIN entity_relations r ON e.id = r.from_entity_id
        WHERE r.to_entity_id = ? AND r.relation_type = ?
        LIMIT 1
        "#,
    )
    .bind(to_entity_id)
    .bind(relation_type)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(entity_from_row).transpose()
}

/// All entities pointing at this one through a relation
pub async fn related_from_all(
    pool: &SqlitePool,
    to_entity_id: i64,
    relation_type: &str,
) -> Result<Vec<Entity>> {
    let rows = sqlx::query(
        r#"
        SELECT e.* FROM entities e
        JOIN entity_relations r ON e.id = r.from_entity_id
        WHERE r.to_entity_id = ? AND r.relation_type = ?
        ORDER BY e.id
        "#,
    )
    .bind(to_entity_id)
    .bind(relation_type)
    .fetch_all(pool)
    .await?;
    rows.iter().map(entity_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::entity::relation;
    use serde_json::json;

    async fn pool() -> SqlitePool {
        crate::db::init_memory_pool().await.unwrap()
    }

    /// Create `n` import_jobs rows (ids 1..=n) so job-scoped entity inserts
    /// satisfy the `entities.job_id` foreign key, mirroring production order.
    async fn seed_jobs(pool: &SqlitePool, n: usize) {
        use crate::models::JobMeta;
        for _ in 0..n {
            crate::db::jobs::create_job(pool, &JobMeta::default()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_insert_or_get_dedupes() {
        let pool = pool().await;
        let raw = json!({"id": "U1", "name": "alice"});

        let first = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();
        let second = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(total_count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_job_scoping_separates_messages_not_users() {
        let pool = pool().await;
        seed_jobs(&pool, 2).await;
        let raw = json!({});

        // Same message ts under two jobs: two rows
        let a = insert_or_get(&pool, EntityType::Message, "1.0", &raw, MappingStatus::Pending, Some(1))
            .await
            .unwrap();
        let b = insert_or_get(&pool, EntityType::Message, "1.0", &raw, MappingStatus::Pending, Some(2))
            .await
            .unwrap();
        assert_ne!(a, b);

        // Users are global: job_id is ignored on insert
        let u1 = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, Some(1))
            .await
            .unwrap();
        let u2 = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, Some(2))
            .await
            .unwrap();
        assert_eq!(u1, u2);
    }

    #[tokio::test]
    async fn test_export_result_update() {
        let pool = pool().await;
        let id = insert_or_get(
            &pool,
            EntityType::User,
            "U1",
            &json!({"name": "alice"}),
            MappingStatus::Pending,
            None,
        )
        .await
        .unwrap();

        update_export_result(&pool, id, MappingStatus::Success, Some("mm-user-1"), None)
            .await
            .unwrap();

        let entity = find_by_slack_id(&pool, EntityType::User, "U1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.status, MappingStatus::Success);
        assert_eq!(entity.mattermost_id.as_deref(), Some("mm-user-1"));

        // Failed update without a new mattermost_id keeps the old mapping
        update_export_result(&pool, id, MappingStatus::Failed, None, Some("later error"))
            .await
            .unwrap();
        let entity = find_by_slack_id(&pool, EntityType::User, "U1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entity.mattermost_id.as_deref(), Some("mm-user-1"));
        assert_eq!(entity.error_message.as_deref(), Some("later error"));
    }

    #[tokio::test]
    async fn test_exportable_excludes_success() {
        let pool = pool().await;
        let raw = json!({});
        let a = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();
        let b = insert_or_get(&pool, EntityType::User, "U2", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();
        update_export_result(&pool, a, MappingStatus::Success, Some("m1"), None)
            .await
            .unwrap();
        update_export_result(&pool, b, MappingStatus::Failed, None, Some("err"))
            .await
            .unwrap();

        let todo = exportable_entities(&pool, EntityType::User, None).await.unwrap();
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].slack_id, "U2");
    }

    #[tokio::test]
    async fn test_relations_walk_both_ways() {
        let pool = pool().await;
        seed_jobs(&pool, 1).await;
        let raw = json!({});
        let message = insert_or_get(&pool, EntityType::Message, "1.0", &raw, MappingStatus::Pending, Some(1))
            .await
            .unwrap();
        let channel = insert_or_get(&pool, EntityType::Channel, "C1", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();
        let user = insert_or_get(&pool, EntityType::User, "U1", &raw, MappingStatus::Pending, None)
            .await
            .unwrap();

        add_relation(&pool, message, channel, relation::POSTED_IN, Some(1))
            .await
            .unwrap();
        add_relation(&pool, user, message, relation::POSTED_BY, Some(1))
            .await
            .unwrap();

        let target = related_to(&pool, message, relation::POSTED_IN).await.unwrap().unwrap();
        assert_eq!(target.slack_id, "C1");

        let author = related_from(&pool, message, relation::POSTED_BY).await.unwrap().unwrap();
        assert_eq!(author.slack_id, "U1");

        assert!(related_to(&pool, message, relation::THREAD_OF).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grouped_counts() {
        let pool = pool().await;
        seed_jobs(&pool, 1).await;
        let raw = json!({});
        for ts in ["1.0", "2.0", "3.0"] {
            insert_or_get(&pool, EntityType::Message, ts, &raw, MappingStatus::Pending, Some(1))
                .await
                .unwrap();
        }
        let id = insert_or_get(&pool, EntityType::Reaction, "1.0_x_U1", &raw, MappingStatus::Pending, Some(1))
            .await
            .unwrap();
        update_export_result(&pool, id, MappingStatus::Success, None, None)
            .await
            .unwrap();

        let totals = counts_by_type(&pool, 1).await.unwrap();
        assert_eq!(totals.get("message"), Some(&3));
        assert_eq!(totals.get("reaction"), Some(&1));

        let nonpending = nonpending_counts_by_type(&pool, 1).await.unwrap();
        assert_eq!(nonpending.get("reaction"), Some(&1));
        assert_eq!(nonpending.get("message"), None);

        let matrix = type_status_counts(&pool).await.unwrap();
        assert!(matrix.contains(&("message".into(), "pending".into(), 3)));
        assert!(matrix.contains(&("reaction".into(), "success".into(), 1)));
    }
}
