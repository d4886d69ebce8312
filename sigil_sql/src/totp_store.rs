//! Persistence of TOTP configurations with encrypted secrets.

use chrono::{DateTime, Utc};
use sigil_core::{
    Dialect, EncryptionKey, ModelError, Page, RowFailure, TotpAlgorithm, TotpConfiguration,
};
use sqlx::Row;
use sqlx::any::AnyRow;

use crate::backend::Backend;
use crate::error::StorageError;

const TABLE: &str = "totp_configurations";

const COLUMNS: &str = "id, username, issuer, algorithm, digits, period, secret, created_at";

/// CRUD over `totp_configurations`.
///
/// Secrets are encrypted with the supplied key before every write and
/// decrypted after every read; nothing above this store sees ciphertext.
#[derive(Debug)]
pub struct TotpStore<'a> {
    backend: &'a Backend,
    key: &'a EncryptionKey,
}

impl<'a> TotpStore<'a> {
    /// Creates a store using `key` for the secret column.
    pub fn new(backend: &'a Backend, key: &'a EncryptionKey) -> Self {
        Self { backend, key }
    }

    /// Loads the configuration for `username`.
    pub async fn load(&self, username: &str) -> Result<TotpConfiguration, StorageError> {
        let row = sqlx::query(
            &self
                .backend
                .sql(&format!("SELECT {COLUMNS} FROM {TABLE} WHERE username = ?")),
        )
        .bind(username)
        .fetch_optional(self.backend.pool())
        .await?
        .ok_or_else(|| StorageError::NoTotpConfiguration(username.to_string()))?;

        self.decode(&row)
    }

    /// Inserts or replaces the configuration for `config.username`.
    pub async fn save(&self, config: &TotpConfiguration) -> Result<(), StorageError> {
        config.validate()?;
        let secret = self.key.encrypt(&config.secret)?;

        let upsert = match self.backend.dialect() {
            Dialect::Sqlite | Dialect::Postgres => {
                "INSERT INTO totp_configurations (username, issuer, algorithm, digits, period, secret, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (username) DO UPDATE SET issuer = excluded.issuer, algorithm = excluded.algorithm, \
                 digits = excluded.digits, period = excluded.period, secret = excluded.secret, created_at = excluded.created_at"
            }
            Dialect::MySql => {
                "INSERT INTO totp_configurations (username, issuer, algorithm, digits, period, secret, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE issuer = VALUES(issuer), algorithm = VALUES(algorithm), \
                 digits = VALUES(digits), period = VALUES(period), secret = VALUES(secret), created_at = VALUES(created_at)"
            }
        };

        sqlx::query(&self.backend.sql(upsert))
            .bind(config.username.as_str())
            .bind(config.issuer.as_str())
            .bind(config.algorithm.as_str())
            .bind(i64::from(config.digits))
            .bind(i64::from(config.period))
            .bind(secret)
            .bind(config.created_at.timestamp())
            .execute(self.backend.pool())
            .await?;

        log::debug!("Saved TOTP configuration for {}", config.username);
        Ok(())
    }

    /// Deletes the configuration for `username`.
    pub async fn delete(&self, username: &str) -> Result<(), StorageError> {
        let result = sqlx::query(&self.backend.sql("DELETE FROM totp_configurations WHERE username = ?"))
            .bind(username)
            .execute(self.backend.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NoTotpConfiguration(username.to_string()));
        }
        log::debug!("Deleted TOTP configuration for {username}");
        Ok(())
    }

    /// Reads page `page` (zero based) of `page_size` configurations ordered by id.
    ///
    /// Rows that cannot be decoded or decrypted are reported in
    /// [`Page::failures`] and the rest of the page is still returned.
    pub async fn list(
        &self,
        page_size: usize,
        page: usize,
    ) -> Result<Page<TotpConfiguration>, StorageError> {
        if page_size == 0 {
            return Err(StorageError::InvalidArgument(
                "page size must be greater than zero".to_string(),
            ));
        }
        let limit = i64::try_from(page_size)
            .map_err(|_| StorageError::InvalidArgument(format!("page size {page_size} is too large")))?;
        let offset = i64::try_from(page.saturating_mul(page_size))
            .map_err(|_| StorageError::InvalidArgument(format!("page {page} is out of range")))?;

        let rows = sqlx::query(&self.backend.sql(&format!(
            "SELECT {COLUMNS} FROM {TABLE} ORDER BY id ASC LIMIT ? OFFSET ?"
        )))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.backend.pool())
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        let mut failures = Vec::new();
        for row in &rows {
            match self.decode(row) {
                Ok(config) => items.push(config),
                Err(err) => {
                    let row_id = row.try_get::<i64, _>("id").unwrap_or_default();
                    log::warn!("Skipping TOTP configuration row {row_id}: {err}");
                    failures.push(RowFailure {
                        table: TABLE,
                        row_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(Page {
            items,
            failures,
            page_size,
            page,
        })
    }

    fn decode(&self, row: &AnyRow) -> Result<TotpConfiguration, StorageError> {
        let id: i64 = row.try_get("id")?;
        let algorithm: String = row.try_get("algorithm")?;
        let digits: i64 = row.try_get("digits")?;
        let period: i64 = row.try_get("period")?;
        let created_at: i64 = row.try_get("created_at")?;
        let secret: Vec<u8> = row.try_get("secret")?;

        let secret = self
            .key
            .decrypt(&secret)
            .map_err(|source| StorageError::RowDecryption {
                table: TABLE,
                row_id: id,
                source,
            })?;

        Ok(TotpConfiguration {
            id: Some(id),
            username: row.try_get("username")?,
            issuer: row.try_get("issuer")?,
            algorithm: algorithm.parse::<TotpAlgorithm>()?,
            digits: u32::try_from(digits).map_err(|_| ModelError::InvalidDigits(digits))?,
            period: u32::try_from(period).map_err(|_| ModelError::InvalidPeriod(period))?,
            secret,
            created_at: DateTime::<Utc>::from_timestamp(created_at, 0)
                .ok_or(ModelError::InvalidTimestamp(created_at))?,
        })
    }
}
