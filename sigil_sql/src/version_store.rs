//! The reserved tables that record the schema version and migration history.
//!
//! `schema_version` holds exactly one row with the current version.
//! `schema_migrations` is append only, one row per applied or reverted step.
//! Both are owned by the migrator: they are created inside the first step's
//! transaction and dropped when the last tracked migration is reverted.

use chrono::{DateTime, Utc};
use sigil_core::schema::PRE1;
use sigil_core::{Dialect, ModelError, SchemaMigration};
use sqlx::{Any, Row, Transaction};

use crate::backend::Backend;
use crate::error::StorageError;

/// Table holding the current version.
pub const SCHEMA_VERSION_TABLE: &str = "schema_version";

/// Table holding the migration history.
pub const SCHEMA_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Tables that identify a legacy schema from before version tracking.
pub const LEGACY_TABLES: &[&str] = &["identity_verification_tokens", "totp_secrets"];

fn create_statements(dialect: Dialect) -> [&'static str; 2] {
    match dialect {
        Dialect::Sqlite => [
            "CREATE TABLE IF NOT EXISTS schema_version (id INTEGER PRIMARY KEY, version BIGINT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS schema_migrations (id INTEGER PRIMARY KEY AUTOINCREMENT, applied BIGINT NOT NULL, version_before BIGINT NOT NULL, version_after BIGINT NOT NULL, application_version VARCHAR(128) NOT NULL)",
        ],
        Dialect::Postgres => [
            "CREATE TABLE IF NOT EXISTS schema_version (id BIGINT PRIMARY KEY, version BIGINT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS schema_migrations (id BIGSERIAL PRIMARY KEY, applied BIGINT NOT NULL, version_before BIGINT NOT NULL, version_after BIGINT NOT NULL, application_version VARCHAR(128) NOT NULL)",
        ],
        Dialect::MySql => [
            "CREATE TABLE IF NOT EXISTS schema_version (id BIGINT PRIMARY KEY, version BIGINT NOT NULL)",
            "CREATE TABLE IF NOT EXISTS schema_migrations (id BIGINT AUTO_INCREMENT PRIMARY KEY, applied BIGINT NOT NULL, version_before BIGINT NOT NULL, version_after BIGINT NOT NULL, application_version VARCHAR(128) NOT NULL)",
        ],
    }
}

/// Reads the current version.
///
/// * no tables at all: `0`
/// * a version table: the version it holds
/// * only the legacy tables: [`PRE1`]
/// * anything else: [`StorageError::UnknownSchemaState`]
pub async fn current_version(backend: &Backend) -> Result<i64, StorageError> {
    let tables = backend.tables().await?;

    if tables.iter().any(|t| t == SCHEMA_VERSION_TABLE) {
        let row = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(backend.pool())
            .await
            .map_err(malformed)?;
        return match row {
            Some(row) => row.try_get::<i64, _>("version").map_err(malformed),
            None => Err(StorageError::UnknownSchemaState(
                "the schema version table is empty".to_string(),
            )),
        };
    }

    if tables.is_empty() {
        return Ok(0);
    }

    if LEGACY_TABLES
        .iter()
        .all(|legacy| tables.iter().any(|t| t == legacy))
    {
        return Ok(PRE1);
    }

    Err(StorageError::UnknownSchemaState(format!(
        "found tables without a schema version: {}",
        tables.join(", ")
    )))
}

fn malformed(err: sqlx::Error) -> StorageError {
    match StorageError::from(err) {
        err @ StorageError::BackendUnavailable(_) => err,
        err => StorageError::UnknownSchemaState(format!(
            "the schema version table is malformed: {err}"
        )),
    }
}

/// Reads the migration history in application order.
pub async fn history(backend: &Backend) -> Result<Vec<SchemaMigration>, StorageError> {
    let rows = sqlx::query(
        "SELECT id, applied, version_before, version_after, application_version FROM schema_migrations ORDER BY id ASC",
    )
    .fetch_all(backend.pool())
    .await?;

    rows.into_iter()
        .map(|row| -> Result<SchemaMigration, StorageError> {
            let applied: i64 = row.try_get("applied")?;
            Ok(SchemaMigration {
                id: row.try_get("id")?,
                applied_at: DateTime::<Utc>::from_timestamp(applied, 0)
                    .ok_or(ModelError::InvalidTimestamp(applied))?,
                version_before: row.try_get("version_before")?,
                version_after: row.try_get("version_after")?,
                software_version: row.try_get("application_version")?,
            })
        })
        .collect()
}

/// Creates the tracking tables if they are missing.
pub async fn ensure_tables(
    tx: &mut Transaction<'static, Any>,
    dialect: Dialect,
) -> Result<(), StorageError> {
    for statement in create_statements(dialect) {
        sqlx::query(statement).execute(&mut **tx).await?;
    }
    Ok(())
}

/// Records a completed step: sets the current version and appends a history row.
pub async fn record_step(
    tx: &mut Transaction<'static, Any>,
    dialect: Dialect,
    version_before: i64,
    version_after: i64,
    software_version: &str,
) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM schema_version")
        .execute(&mut **tx)
        .await?;
    sqlx::query(&dialect.rebind("INSERT INTO schema_version (id, version) VALUES (1, ?)"))
        .bind(version_after)
        .execute(&mut **tx)
        .await?;
    sqlx::query(&dialect.rebind(
        "INSERT INTO schema_migrations (applied, version_before, version_after, application_version) VALUES (?, ?, ?, ?)",
    ))
    .bind(Utc::now().timestamp())
    .bind(version_before)
    .bind(version_after)
    .bind(software_version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Drops the tracking tables after the last tracked migration was reverted.
pub async fn drop_tables(tx: &mut Transaction<'static, Any>) -> Result<(), StorageError> {
    sqlx::query("DROP TABLE IF EXISTS schema_migrations")
        .execute(&mut **tx)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS schema_version")
        .execute(&mut **tx)
        .await?;
    Ok(())
}
