//! Thin adapter over a pooled SQL connection.
//!
//! The adapter speaks to every dialect through [`sqlx::Any`], rewrites
//! placeholders for the active dialect and provides the migration exclusivity
//! lock. Exclusivity is enforced twice: an in-process mutex rejects concurrent
//! migrations on the same [`Backend`], and a backend visible lock rejects other
//! processes sharing the database.

use std::sync::Arc;
use std::time::Duration;

use sigil_core::{Capabilities, Dialect};
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Row, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::StorageError;

/// Internal table backing the SQLite migration lock.
pub const MIGRATION_LOCK_TABLE: &str = "_migration_lock";

/// Key of the PostgreSQL advisory lock.
const ADVISORY_LOCK_KEY: i64 = 0x5349_474C_0000_0001;

/// Name of the MySQL user lock.
const NAMED_LOCK: &str = "sigil_schema_migrations";

/// How often a contended migration lock is retried.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A pooled connection to one database.
#[derive(Debug)]
pub struct Backend {
    pool: AnyPool,
    dialect: Dialect,
    migration_guard: Arc<Mutex<()>>,
    holder: String,
}

impl Backend {
    /// Connects using `config`.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout())
            .connect(&config.dsn)
            .await?;

        log::debug!(
            "Connected to {} backend with up to {} connections",
            config.dialect,
            config.pool.max_connections
        );

        Ok(Self {
            pool,
            dialect: config.dialect,
            migration_guard: Arc::new(Mutex::new(())),
            holder: Uuid::new_v4().to_string(),
        })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// The active dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Capabilities of the active dialect.
    pub fn capabilities(&self) -> Capabilities {
        self.dialect.capabilities()
    }

    /// Rewrites `?` placeholders for the active dialect.
    pub fn sql(&self, query: &str) -> String {
        self.dialect.rebind(query)
    }

    /// Starts a transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Any>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// Round trips a trivial query.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether the pool was closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Names of the user tables in the current schema, sorted.
    ///
    /// Internal bookkeeping tables of the adapter are not listed.
    pub async fn tables(&self) -> Result<Vec<String>, StorageError> {
        let query = match self.dialect {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Dialect::Postgres => {
                "SELECT CAST(table_name AS TEXT) AS name FROM information_schema.tables WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY name"
            }
            Dialect::MySql => {
                "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY name"
            }
        };

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            if name != MIGRATION_LOCK_TABLE {
                tables.push(name);
            }
        }
        Ok(tables)
    }

    /// Acquires the migration lock, waiting up to `timeout` while another
    /// migration holds it.
    pub async fn lock_migrations(
        &self,
        timeout: Option<Duration>,
    ) -> Result<MigrationLock, StorageError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(lock) = self.try_lock_migrations().await? {
                log::debug!("Acquired migration lock ({})", self.holder);
                return Ok(lock);
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    log::debug!("Migration lock is held, retrying");
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                _ => {
                    log::warn!("Migration lock is held by another migration");
                    return Err(StorageError::MigrationInProgress);
                }
            }
        }
    }

    async fn try_lock_migrations(&self) -> Result<Option<MigrationLock>, StorageError> {
        let Ok(guard) = self.migration_guard.clone().try_lock_owned() else {
            return Ok(None);
        };

        let held = match self.dialect {
            Dialect::Postgres => {
                let mut conn = self.pool.acquire().await?;
                let acquired: bool = sqlx::query("SELECT pg_try_advisory_lock($1)")
                    .bind(ADVISORY_LOCK_KEY)
                    .fetch_one(&mut *conn)
                    .await?
                    .try_get(0)?;
                acquired.then_some(Held::Advisory(conn))
            }
            Dialect::MySql => {
                let mut conn = self.pool.acquire().await?;
                let acquired: Option<i64> = sqlx::query("SELECT CAST(GET_LOCK(?, 0) AS SIGNED)")
                    .bind(NAMED_LOCK)
                    .fetch_one(&mut *conn)
                    .await?
                    .try_get(0)?;
                (acquired == Some(1)).then_some(Held::Named(conn))
            }
            Dialect::Sqlite => {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS _migration_lock (id INTEGER PRIMARY KEY, holder VARCHAR(64) NOT NULL, acquired_at BIGINT NOT NULL)",
                )
                .execute(&self.pool)
                .await?;

                let inserted = sqlx::query(
                    "INSERT INTO _migration_lock (id, holder, acquired_at) VALUES (1, ?, ?)",
                )
                .bind(self.holder.as_str())
                .bind(chrono::Utc::now().timestamp())
                .execute(&self.pool)
                .await;

                match inserted {
                    Ok(_) => Some(Held::Row {
                        pool: self.pool.clone(),
                        holder: self.holder.clone(),
                    }),
                    Err(sqlx::Error::Database(err)) if err.is_unique_violation() => None,
                    Err(err) => return Err(err.into()),
                }
            }
        };

        Ok(held.map(|held| MigrationLock {
            _guard: guard,
            held: Some(held),
        }))
    }
}

#[derive(Debug)]
enum Held {
    Advisory(PoolConnection<Any>),
    Named(PoolConnection<Any>),
    Row { pool: AnyPool, holder: String },
}

impl Held {
    async fn release(self) -> Result<(), sqlx::Error> {
        match self {
            Held::Advisory(mut conn) => {
                sqlx::query("SELECT pg_advisory_unlock($1)")
                    .bind(ADVISORY_LOCK_KEY)
                    .execute(&mut *conn)
                    .await?;
            }
            Held::Named(mut conn) => {
                sqlx::query("SELECT RELEASE_LOCK(?)")
                    .bind(NAMED_LOCK)
                    .execute(&mut *conn)
                    .await?;
            }
            Held::Row { pool, holder } => {
                sqlx::query("DELETE FROM _migration_lock WHERE id = 1 AND holder = ?")
                    .bind(holder)
                    .execute(&pool)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Exclusive right to migrate the schema.
///
/// Call [`MigrationLock::release`] when done. A lock dropped without release
/// still frees the backend lock: session locks by closing their connection,
/// the SQLite row by a background delete.
#[derive(Debug)]
pub struct MigrationLock {
    _guard: OwnedMutexGuard<()>,
    held: Option<Held>,
}

impl MigrationLock {
    /// Releases the lock.
    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            match held.release().await {
                Ok(()) => log::debug!("Released migration lock"),
                Err(err) => log::warn!("Failed to release migration lock: {err}"),
            }
        }
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        match self.held.take() {
            None => {}
            Some(Held::Advisory(mut conn)) | Some(Held::Named(mut conn)) => {
                conn.close_on_drop();
            }
            Some(held @ Held::Row { .. }) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = held.release().await {
                            log::warn!("Failed to release migration lock: {err}");
                        }
                    });
                }
                Err(_) => log::warn!(
                    "Migration lock dropped outside of a runtime, remove the row in {MIGRATION_LOCK_TABLE} manually"
                ),
            },
        }
    }
}
