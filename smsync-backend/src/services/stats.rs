//! Mapping statistics
//!
//! The type × status cross-tabulation behind `GET /stats/mappings` and the
//! progress stream payload. Absent cells are zero-filled and statuses keep
//! a fixed order so the dashboard table renders stable columns.

use serde::Serialize;
use smsync_common::Result;
use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::db;
use crate::models::MappingStatus;

#[derive(Debug, Clone, Serialize)]
pub struct MappingStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    /// Column order for rendering: pending, skipped, failed, success
    pub statuses: Vec<String>,
    /// Row order: sorted entity types
    pub types: Vec<String>,
    /// type → status → count, zero-filled
    pub matrix: BTreeMap<String, BTreeMap<String, u64>>,
    pub totals_row: BTreeMap<String, u64>,
}

/// Compute the full mapping statistics snapshot
pub async fn mapping_stats(pool: &SqlitePool) -> Result<MappingStats> {
    let total = db::entities::total_count(pool).await?;
    let cells = db::entities::type_status_counts(pool).await?;

    let statuses: Vec<String> = MappingStatus::ORDER
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();

    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_status: BTreeMap<String, u64> = BTreeMap::new();
    for (entity_type, status, count) in &cells {
        *by_type.entry(entity_type.clone()).or_default() += count;
        *by_status.entry(status.clone()).or_default() += count;
    }

    let types: Vec<String> = by_type.keys().cloned().collect();

    let mut matrix: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for entity_type in &types {
        let row = statuses.iter().map(|s| (s.clone(), 0)).collect();
        matrix.insert(entity_type.clone(), row);
    }
    for (entity_type, status, count) in &cells {
        if let Some(row) = matrix.get_mut(entity_type) {
            if let Some(cell) = row.get_mut(status) {
                *cell = *count;
            }
        }
    }

    let mut totals_row: BTreeMap<String, u64> = statuses.iter().map(|s| (s.clone(), 0)).collect();
    for row in matrix.values() {
        for (status, count) in row {
            *totals_row.entry(status.clone()).or_default() += count;
        }
    }

    Ok(MappingStats {
        total,
        by_type,
        by_status,
        statuses,
        types,
        matrix,
        totals_row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use serde_json::json;

    #[tokio::test]
    async fn test_matrix_zero_fills_absent_cells() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        // Parent job for the job-scoped message entities (FK on entities.job_id)
        crate::db::jobs::create_job(&pool, &crate::models::JobMeta::default())
            .await
            .unwrap();
        for i in 0..5 {
            let id = db::entities::insert_or_get(
                &pool,
                EntityType::Message,
                &format!("{i}.0"),
                &json!({}),
                MappingStatus::Pending,
                Some(1),
            )
            .await
            .unwrap();
            db::entities::update_export_result(&pool, id, MappingStatus::Success, None, None)
                .await
                .unwrap();
        }

        let stats = mapping_stats(&pool).await.unwrap();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.types, vec!["message".to_string()]);
        assert_eq!(
            stats.statuses,
            vec!["pending", "skipped", "failed", "success"]
        );
        // done=5, pending=0 (zero-filled, not absent)
        assert_eq!(stats.matrix["message"]["success"], 5);
        assert_eq!(stats.matrix["message"]["pending"], 0);
        assert_eq!(stats.totals_row["success"], 5);
        assert_eq!(stats.by_status.get("success"), Some(&5));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let pool = crate::db::init_memory_pool().await.unwrap();
        let stats = mapping_stats(&pool).await.unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.types.is_empty());
        assert_eq!(stats.totals_row["pending"], 0);
    }
}
