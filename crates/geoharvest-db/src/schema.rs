//! Reference schema for the PostgreSQL stores.

use geoharvest_core::AppError;
use sqlx::PgPool;
use tracing::debug;

/// Schema statements, applied in order. Each one is idempotent and executed
/// on its own because sqlx runs a single statement per query.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS harvest_sources (
        source_id VARCHAR PRIMARY KEY,
        name TEXT NOT NULL,
        icon TEXT,
        registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS catalog_records (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        remote_id VARCHAR NOT NULL,
        source_id VARCHAR NOT NULL,
        schema_tag VARCHAR NOT NULL,
        payload TEXT NOT NULL,
        first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT uk_catalog_records_remote_id UNIQUE (remote_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_catalog_records_source ON catalog_records(source_id)",
    r#"CREATE TABLE IF NOT EXISTS harvest_index (
        node_id VARCHAR NOT NULL,
        remote_id VARCHAR NOT NULL,
        local_id VARCHAR NOT NULL,
        fingerprint VARCHAR(64),
        modified TEXT,
        PRIMARY KEY (node_id, remote_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS harvest_results (
        node_id VARCHAR PRIMARY KEY,
        status VARCHAR NOT NULL,
        result JSONB NOT NULL,
        finished_at TIMESTAMPTZ NOT NULL
    )"#,
];

/// Creates the tables used by [`CatalogRepository`](crate::CatalogRepository)
/// and [`HarvestStateRepository`](crate::HarvestStateRepository).
///
/// Safe to run against an already initialized database.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(pool)
            .await
            .map_err(AppError::DatabaseError)?;
    }
    debug!(statements = MIGRATIONS.len(), "Schema up to date");
    Ok(())
}
