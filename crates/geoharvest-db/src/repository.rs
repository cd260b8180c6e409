//! Catalog record and provenance source persistence.

use std::sync::Arc;

use geoharvest_core::{AppError, MetadataStore, RecordWrite, SourceRegistry, StoredRecordRef};
use sqlx::{PgPool, Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

/// Schema tags accepted by default.
pub const DEFAULT_SCHEMAS: &[&str] = &["iso19139", "dublin-core"];

/// Repository for harvested metadata records and their sources.
///
/// Records are keyed by remote identifier, so a record harvested by one
/// node is visible to every other node as owned by that node's source.
///
/// # Examples
///
/// ```no_run
/// use sqlx::postgres::PgPoolOptions;
/// use geoharvest_db::CatalogRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = PgPoolOptions::new()
///     .max_connections(5)
///     .connect("postgresql://localhost/geoharvest")
///     .await?;
///
/// let repo = CatalogRepository::new(pool);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CatalogRepository {
    pool: Pool<Postgres>,
    schemas: Arc<Vec<String>>,
}

#[derive(sqlx::FromRow)]
struct RecordRefRow {
    id: Uuid,
    source_id: String,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self::with_schemas(pool, DEFAULT_SCHEMAS.iter().copied())
    }

    /// Creates a repository that only accepts the given schema tags.
    pub fn with_schemas<'a>(pool: PgPool, schemas: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            pool,
            schemas: Arc::new(schemas.into_iter().map(str::to_string).collect()),
        }
    }

    fn check_write(&self, record: &RecordWrite<'_>) -> Result<(), AppError> {
        if !self.schemas.iter().any(|s| s == record.schema) {
            return Err(AppError::UnknownSchema(record.schema.to_string()));
        }
        if record.payload.trim().is_empty() {
            return Err(AppError::StoreError(format!(
                "empty payload for record {}",
                record.remote_id
            )));
        }
        Ok(())
    }

    fn parse_local_id(local_id: &str) -> Result<Uuid, AppError> {
        Uuid::parse_str(local_id)
            .map_err(|_| AppError::StoreError(format!("invalid local id: {}", local_id)))
    }

    /// Number of records currently owned by a source.
    pub async fn count_for_source(&self, source_id: &str) -> Result<i64, AppError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM catalog_records WHERE source_id = $1")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(row.0)
    }

    /// Name and icon of a registered source.
    pub async fn get_source(
        &self,
        source_id: &str,
    ) -> Result<Option<(String, Option<String>)>, AppError> {
        sqlx::query_as("SELECT name, icon FROM harvest_sources WHERE source_id = $1")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    /// Payload stored for a record, by local identifier.
    pub async fn get_payload(&self, local_id: &str) -> Result<Option<String>, AppError> {
        let id = Self::parse_local_id(local_id)?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM catalog_records WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;
        Ok(row.map(|r| r.0))
    }
}

impl MetadataStore for CatalogRepository {
    async fn create(&self, record: &RecordWrite<'_>) -> Result<String, AppError> {
        self.check_write(record)?;

        let rec: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO catalog_records (remote_id, source_id, schema_tag, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(record.remote_id)
        .bind(record.source_id)
        .bind(record.schema)
        .bind(record.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::StoreError(
                format!("record {} already exists", record.remote_id),
            ),
            other => AppError::DatabaseError(other),
        })?;

        debug!(remote_id = record.remote_id, local_id = %rec.0, "Record created");
        Ok(rec.0.to_string())
    }

    async fn update(&self, local_id: &str, record: &RecordWrite<'_>) -> Result<(), AppError> {
        self.check_write(record)?;
        let id = Self::parse_local_id(local_id)?;

        let result = sqlx::query(
            r#"
            UPDATE catalog_records
            SET source_id = $2,
                schema_tag = $3,
                payload = $4,
                last_updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.source_id)
        .bind(record.schema)
        .bind(record.payload)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        if result.rows_affected() == 0 {
            return Err(AppError::StoreError(format!("no record {}", local_id)));
        }
        Ok(())
    }

    async fn remove(&self, local_id: &str) -> Result<(), AppError> {
        let id = Self::parse_local_id(local_id)?;
        sqlx::query("DELETE FROM catalog_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    async fn find_by_remote_id(&self, remote_id: &str) -> Result<Option<StoredRecordRef>, AppError> {
        let row: Option<RecordRefRow> =
            sqlx::query_as("SELECT id, source_id FROM catalog_records WHERE remote_id = $1")
                .bind(remote_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;

        Ok(row.map(|r| StoredRecordRef {
            local_id: r.id.to_string(),
            source_id: r.source_id,
        }))
    }
}

impl SourceRegistry for CatalogRepository {
    async fn register_or_update_source(
        &self,
        source_id: &str,
        name: &str,
        icon: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO harvest_sources (source_id, name, icon)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                icon = EXCLUDED.icon,
                updated_at = NOW()
            "#,
        )
        .bind(source_id)
        .bind(name)
        .bind(icon)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        debug!(source_id, name, "Source registered");
        Ok(())
    }
}
