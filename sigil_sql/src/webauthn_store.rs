//! Persistence of WebAuthn devices with encrypted public keys.

use chrono::{DateTime, Utc};
use sigil_core::{Dialect, EncryptionKey, ModelError, WebauthnDevice};
use sqlx::Row;
use sqlx::any::AnyRow;

use crate::backend::Backend;
use crate::error::StorageError;

const TABLE: &str = "webauthn_devices";

/// CRUD over `webauthn_devices`.
#[derive(Debug)]
pub struct WebauthnStore<'a> {
    backend: &'a Backend,
    key: &'a EncryptionKey,
}

impl<'a> WebauthnStore<'a> {
    /// Creates a store using `key` for the public key column.
    pub fn new(backend: &'a Backend, key: &'a EncryptionKey) -> Self {
        Self { backend, key }
    }

    /// Inserts a device, replacing one with the same username and description.
    pub async fn save(&self, device: &WebauthnDevice) -> Result<(), StorageError> {
        device.validate()?;
        let public_key = self.key.encrypt(&device.public_key)?;

        let upsert = match self.backend.dialect() {
            Dialect::Sqlite | Dialect::Postgres => {
                "INSERT INTO webauthn_devices (username, description, kid, public_key, created_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (username, description) DO UPDATE SET kid = excluded.kid, \
                 public_key = excluded.public_key, created_at = excluded.created_at"
            }
            Dialect::MySql => {
                "INSERT INTO webauthn_devices (username, description, kid, public_key, created_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE kid = VALUES(kid), public_key = VALUES(public_key), \
                 created_at = VALUES(created_at)"
            }
        };

        sqlx::query(&self.backend.sql(upsert))
            .bind(device.username.as_str())
            .bind(device.description.as_str())
            .bind(device.kid.as_str())
            .bind(public_key)
            .bind(device.created_at.timestamp())
            .execute(self.backend.pool())
            .await?;
        Ok(())
    }

    /// All devices registered by `username`, oldest first.
    pub async fn load(&self, username: &str) -> Result<Vec<WebauthnDevice>, StorageError> {
        let rows = sqlx::query(&self.backend.sql(
            "SELECT id, username, description, kid, public_key, created_at FROM webauthn_devices WHERE username = ? ORDER BY id ASC",
        ))
        .bind(username)
        .fetch_all(self.backend.pool())
        .await?;

        rows.iter().map(|row| self.decode(row)).collect()
    }

    /// Removes the device `description` of `username`.
    pub async fn delete(&self, username: &str, description: &str) -> Result<(), StorageError> {
        let result = sqlx::query(
            &self
                .backend
                .sql("DELETE FROM webauthn_devices WHERE username = ? AND description = ?"),
        )
        .bind(username)
        .bind(description)
        .execute(self.backend.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NoWebauthnDevice {
                username: username.to_string(),
                description: description.to_string(),
            });
        }
        Ok(())
    }

    fn decode(&self, row: &AnyRow) -> Result<WebauthnDevice, StorageError> {
        let id: i64 = row.try_get("id")?;
        let created_at: i64 = row.try_get("created_at")?;
        let public_key: Vec<u8> = row.try_get("public_key")?;

        Ok(WebauthnDevice {
            id: Some(id),
            username: row.try_get("username")?,
            description: row.try_get("description")?,
            kid: row.try_get("kid")?,
            public_key: self.key.decrypt(&public_key).map_err(|source| {
                StorageError::RowDecryption {
                    table: TABLE,
                    row_id: id,
                    source,
                }
            })?,
            created_at: DateTime::<Utc>::from_timestamp(created_at, 0)
                .ok_or(ModelError::InvalidTimestamp(created_at))?,
        })
    }
}
