//! Encryption key validation and rotation.
//!
//! A known marker encrypted under the active key is stored in the `encryption`
//! table. A candidate key is valid when it decrypts that check value back to
//! the marker, so keys can be verified without touching user data.

use secrecy::{ExposeSecret, SecretString};
use sigil_core::crypto::MIN_KEY_LENGTH;
use sigil_core::{Dialect, EncryptionKey, KeyCheckFailure, Registry, RowFailure};
use sqlx::{Any, Row, Transaction};
use zeroize::Zeroizing;

use crate::backend::Backend;
use crate::error::StorageError;
use crate::version_store;

/// Name of the check value row.
const CHECK_VALUE_NAME: &str = "check";

/// A column holding values encrypted with the active key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretColumn {
    /// Table name.
    pub table: &'static str,
    /// Encrypted column.
    pub column: &'static str,
}

/// Every encrypted column. Tables that do not exist yet are skipped.
pub const SECRET_COLUMNS: &[SecretColumn] = &[
    SecretColumn {
        table: "totp_configurations",
        column: "secret",
    },
    SecretColumn {
        table: "webauthn_devices",
        column: "public_key",
    },
];

/// Result of the verbose diagnostic pass over every encrypted row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCheckReport {
    /// Rows examined.
    pub checked: usize,
    /// Rows that failed to decrypt.
    pub failures: Vec<RowFailure>,
}

impl KeyCheckReport {
    /// True when every row decrypted.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes the check value for `key`, replacing any previous one.
pub(crate) async fn write_check_value(
    tx: &mut Transaction<'static, Any>,
    dialect: Dialect,
    key: &EncryptionKey,
) -> Result<(), StorageError> {
    let value = key.check_value()?;
    sqlx::query(&dialect.rebind("DELETE FROM encryption WHERE name = ?"))
        .bind(CHECK_VALUE_NAME)
        .execute(&mut **tx)
        .await?;
    sqlx::query(&dialect.rebind("INSERT INTO encryption (name, value) VALUES (?, ?)"))
        .bind(CHECK_VALUE_NAME)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Validates and rotates the column encryption key.
#[derive(Debug)]
pub struct EncryptionManager<'a> {
    backend: &'a Backend,
    registry: Registry,
}

impl<'a> EncryptionManager<'a> {
    /// Creates a manager over `backend`.
    pub fn new(backend: &'a Backend, registry: Registry) -> Self {
        Self { backend, registry }
    }

    async fn require_encryption_support(&self) -> Result<i64, StorageError> {
        let current = version_store::current_version(self.backend).await?;
        match self.registry.encryption_version() {
            Some(required) if current >= required => Ok(current),
            _ => Err(StorageError::SchemaEncryptionVersionUnsupported { current }),
        }
    }

    async fn existing_columns(&self) -> Result<Vec<SecretColumn>, StorageError> {
        let tables = self.backend.tables().await?;
        Ok(SECRET_COLUMNS
            .iter()
            .filter(|c| tables.iter().any(|t| t == c.table))
            .copied()
            .collect())
    }

    /// Checks `key` against the stored check value.
    ///
    /// With `verbose` every encrypted row is also decrypted and failures are
    /// collected in the returned report instead of aborting. The report is
    /// attached to [`StorageError::SchemaEncryptionInvalidKey`] as well.
    pub async fn check_key(
        &self,
        key: &EncryptionKey,
        verbose: bool,
    ) -> Result<Option<KeyCheckReport>, StorageError> {
        self.require_encryption_support().await?;

        let stored: Option<Vec<u8>> = sqlx::query(
            &self.backend.sql("SELECT value FROM encryption WHERE name = ?"),
        )
        .bind(CHECK_VALUE_NAME)
        .fetch_optional(self.backend.pool())
        .await?
        .map(|row| row.try_get("value"))
        .transpose()?;

        let outcome = match stored {
            Some(value) => key.verify_check_value(&value),
            None => Err(KeyCheckFailure::Missing),
        };

        let report = if verbose {
            Some(self.verify_rows(key).await?)
        } else {
            None
        };

        match outcome {
            Ok(()) => Ok(report),
            Err(failure) => {
                log::warn!("Encryption key check failed: {failure}");
                Err(StorageError::SchemaEncryptionInvalidKey {
                    failure,
                    report: report.map(Box::new),
                })
            }
        }
    }

    async fn verify_rows(&self, key: &EncryptionKey) -> Result<KeyCheckReport, StorageError> {
        let mut report = KeyCheckReport::default();
        for column in self.existing_columns().await? {
            let query = format!(
                "SELECT id, {} FROM {} ORDER BY id ASC",
                column.column, column.table
            );
            let rows = sqlx::query(&query).fetch_all(self.backend.pool()).await?;
            for row in rows {
                let id: i64 = row.try_get("id")?;
                let value: Vec<u8> = row.try_get(column.column)?;
                report.checked += 1;
                if let Err(err) = key.decrypt(&value) {
                    log::warn!("Could not decrypt {} row {id}: {err}", column.table);
                    report.failures.push(RowFailure {
                        table: column.table,
                        row_id: id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        log::debug!(
            "Verified {} encrypted values, {} failed",
            report.checked,
            report.failures.len()
        );
        Ok(report)
    }

    /// Re-encrypts every encrypted value and the check value under `new_secret`.
    ///
    /// The schema must be at the latest version. All rewrites happen in one
    /// transaction with the secret tables locked against other writers; any
    /// failure rolls everything back. Returns the new key.
    pub async fn change_key(
        &self,
        current: &EncryptionKey,
        new_secret: &SecretString,
    ) -> Result<EncryptionKey, StorageError> {
        if new_secret.expose_secret().chars().count() < MIN_KEY_LENGTH {
            return Err(StorageError::InvalidEncryptionKey(format!(
                "the new encryption key must be at least {MIN_KEY_LENGTH} characters"
            )));
        }

        let version = version_store::current_version(self.backend).await?;
        let latest = self.registry.latest();
        if version != latest {
            return Err(StorageError::OutdatedSchema {
                current: version,
                latest,
            });
        }
        self.require_encryption_support().await?;

        let new_key = EncryptionKey::derive(new_secret.expose_secret());
        let columns = self.existing_columns().await?;
        let dialect = self.backend.dialect();
        let for_update = match dialect {
            Dialect::Sqlite => "",
            Dialect::Postgres | Dialect::MySql => " FOR UPDATE",
        };

        let mut tx = self.backend.begin().await?;
        lock_secret_tables(&mut tx, dialect, &columns).await?;

        let stored: Option<Vec<u8>> = sqlx::query(&dialect.rebind(&format!(
            "SELECT value FROM encryption WHERE name = ?{for_update}"
        )))
        .bind(CHECK_VALUE_NAME)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.try_get("value"))
        .transpose()?;

        let verified = match stored {
            Some(value) => current.verify_check_value(&value),
            None => Err(KeyCheckFailure::Missing),
        };
        if let Err(failure) = verified {
            return Err(StorageError::SchemaEncryptionInvalidKey {
                failure,
                report: None,
            });
        }

        let mut rewrapped = 0;
        for column in &columns {
            let select = format!(
                "SELECT id, {} FROM {} ORDER BY id ASC{for_update}",
                column.column, column.table
            );
            let update = dialect.rebind(&format!(
                "UPDATE {} SET {} = ? WHERE id = ?",
                column.table, column.column
            ));

            let rows = sqlx::query(&select).fetch_all(&mut *tx).await?;
            for row in rows {
                let id: i64 = row.try_get("id")?;
                let value: Vec<u8> = row.try_get(column.column)?;
                let plaintext = Zeroizing::new(current.decrypt(&value).map_err(|source| {
                    StorageError::RowDecryption {
                        table: column.table,
                        row_id: id,
                        source,
                    }
                })?);
                sqlx::query(&update)
                    .bind(new_key.encrypt(&plaintext)?)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                rewrapped += 1;
            }
        }

        write_check_value(&mut tx, dialect, &new_key).await?;
        tx.commit().await?;

        log::info!("Encryption key changed, {rewrapped} values re-encrypted");
        Ok(new_key)
    }
}

/// Keeps other writers out of the secret tables until the transaction ends.
async fn lock_secret_tables(
    tx: &mut Transaction<'static, Any>,
    dialect: Dialect,
    columns: &[SecretColumn],
) -> Result<(), StorageError> {
    match dialect {
        Dialect::Postgres => {
            let tables: Vec<&str> = std::iter::once("encryption")
                .chain(columns.iter().map(|c| c.table))
                .collect();
            let statement = format!("LOCK TABLE {} IN EXCLUSIVE MODE", tables.join(", "));
            sqlx::query(&statement).execute(&mut **tx).await?;
        }
        // Rows are locked by the FOR UPDATE selects.
        Dialect::MySql => {}
        // Takes the database write lock up front.
        Dialect::Sqlite => {
            sqlx::query("UPDATE encryption SET value = value WHERE name = ?")
                .bind(CHECK_VALUE_NAME)
                .execute(&mut **tx)
                .await?;
        }
    }
    Ok(())
}
