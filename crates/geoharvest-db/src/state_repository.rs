//! Harvest state persistence: local record indexes and last results.

use geoharvest_core::{
    AppError, HarvestResult, IndexStore, LocalRecordEntry, LocalRecordIndex, ResultStore,
};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;

/// Repository for the state a harvester keeps between runs.
///
/// Each node's index is replaced as a whole inside a transaction, so a
/// reader never observes a half-written index.
#[derive(Clone)]
pub struct HarvestStateRepository {
    pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    remote_id: String,
    local_id: String,
    fingerprint: Option<String>,
    modified: Option<String>,
}

impl HarvestStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Last results of every node, most recent first.
    pub async fn all_results(&self) -> Result<Vec<HarvestResult>, AppError> {
        let rows: Vec<(Json<HarvestResult>,)> =
            sqlx::query_as("SELECT result FROM harvest_results ORDER BY finished_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(rows.into_iter().map(|(Json(result),)| result).collect())
    }
}

impl IndexStore for HarvestStateRepository {
    async fn load_index(&self, node_id: &str) -> Result<LocalRecordIndex, AppError> {
        let rows: Vec<IndexRow> = sqlx::query_as(
            r#"
            SELECT remote_id, local_id, fingerprint, modified
            FROM harvest_index
            WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.remote_id,
                    LocalRecordEntry {
                        local_id: row.local_id,
                        fingerprint: row.fingerprint,
                        modified: row.modified,
                    },
                )
            })
            .collect())
    }

    async fn save_index(&self, node_id: &str, index: &LocalRecordIndex) -> Result<(), AppError> {
        let mut remote_ids = Vec::with_capacity(index.len());
        let mut local_ids = Vec::with_capacity(index.len());
        let mut fingerprints: Vec<Option<String>> = Vec::with_capacity(index.len());
        let mut modified: Vec<Option<String>> = Vec::with_capacity(index.len());
        for (remote_id, entry) in index.iter() {
            remote_ids.push(remote_id.clone());
            local_ids.push(entry.local_id.clone());
            fingerprints.push(entry.fingerprint.clone());
            modified.push(entry.modified.clone());
        }

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        sqlx::query("DELETE FROM harvest_index WHERE node_id = $1")
            .bind(node_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        if !remote_ids.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO harvest_index (node_id, remote_id, local_id, fingerprint, modified)
                SELECT $1, * FROM UNNEST($2::varchar[], $3::varchar[], $4::varchar[], $5::text[])
                "#,
            )
            .bind(node_id)
            .bind(&remote_ids)
            .bind(&local_ids)
            .bind(&fingerprints)
            .bind(&modified)
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        tx.commit().await.map_err(AppError::DatabaseError)?;

        debug!(node_id, entries = remote_ids.len(), "Index saved");
        Ok(())
    }

    async fn discard_index(&self, node_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM harvest_index WHERE node_id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}

impl ResultStore for HarvestStateRepository {
    async fn record_result(&self, result: &HarvestResult) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_results (node_id, status, result, finished_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (node_id)
            DO UPDATE SET
                status = EXCLUDED.status,
                result = EXCLUDED.result,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(&result.node_id)
        .bind(result.status.as_str())
        .bind(Json(result))
        .bind(result.finished_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn last_result(&self, node_id: &str) -> Result<Option<HarvestResult>, AppError> {
        let row: Option<(Json<HarvestResult>,)> =
            sqlx::query_as("SELECT result FROM harvest_results WHERE node_id = $1")
                .bind(node_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(row.map(|(Json(result),)| result))
    }
}
