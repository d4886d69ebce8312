//! Configuration for the SQL storage provider.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sigil_core::Dialect;
use sigil_core::crypto::MIN_KEY_LENGTH;

use crate::error::StorageError;

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Seconds to wait for a free connection.
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}

impl PoolConfig {
    /// The acquire timeout as a [`Duration`].
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// A fully loaded storage configuration.
///
/// Produced by the service's configuration loader and passed to
/// [`crate::SqlProvider::open`].
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Backend dialect.
    pub dialect: Dialect,
    /// Connection string, e.g. `sqlite:///var/lib/app/db.sqlite3?mode=rwc`.
    pub dsn: String,
    /// Secret the column encryption key is derived from.
    pub encryption_key: SecretString,
    /// Pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// How long to wait for another process's migration to finish before
    /// failing. `None` fails immediately.
    #[serde(default)]
    pub migration_lock_timeout_secs: Option<u64>,
    /// Version string recorded in the migration history.
    #[serde(default = "default_software_version")]
    pub software_version: String,
}

fn default_software_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl StorageConfig {
    /// Creates a configuration with default pool settings.
    pub fn new(dialect: Dialect, dsn: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            dialect,
            dsn: dsn.into(),
            encryption_key: SecretString::from(encryption_key.into()),
            pool: PoolConfig::default(),
            migration_lock_timeout_secs: None,
            software_version: default_software_version(),
        }
    }

    /// Sets the pool settings.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Waits up to `secs` for the migration lock.
    pub fn with_migration_lock_timeout(mut self, secs: u64) -> Self {
        self.migration_lock_timeout_secs = Some(secs);
        self
    }

    /// Sets the version recorded in the migration history.
    pub fn with_software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = version.into();
        self
    }

    /// The migration lock timeout as a [`Duration`].
    pub fn migration_lock_timeout(&self) -> Option<Duration> {
        self.migration_lock_timeout_secs.map(Duration::from_secs)
    }

    /// Rejects configurations the provider cannot use.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.dsn.trim().is_empty() {
            return Err(StorageError::Config("the dsn must not be empty".to_string()));
        }
        match Dialect::from_dsn(&self.dsn) {
            Ok(dialect) if dialect == self.dialect => {}
            Ok(dialect) => {
                return Err(StorageError::Config(format!(
                    "the dsn is for {dialect} but the dialect is {}",
                    self.dialect
                )));
            }
            Err(err) => return Err(StorageError::Config(err.to_string())),
        }
        if self.encryption_key.expose_secret().chars().count() < MIN_KEY_LENGTH {
            return Err(StorageError::Config(format!(
                "the encryption key must be at least {MIN_KEY_LENGTH} characters"
            )));
        }
        if self.pool.max_connections == 0 {
            return Err(StorageError::Config(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: StorageConfig = serde_json::from_str(
            r#"{
                "dialect": "postgres",
                "dsn": "postgres://u:p@localhost/auth",
                "encryption_key": "a-very-long-encryption-key"
            }"#,
        )
        .unwrap();

        assert_eq!(config.dialect, Dialect::Postgres);
        assert_eq!(config.pool.max_connections, 5);
        assert_eq!(config.migration_lock_timeout(), None);
        assert_eq!(config.software_version, env!("CARGO_PKG_VERSION"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn debug_does_not_print_the_key() {
        let config = StorageConfig::new(
            Dialect::Sqlite,
            "sqlite://db.sqlite3",
            "a-very-long-encryption-key",
        );
        assert!(!format!("{config:?}").contains("a-very-long-encryption-key"));
    }

    #[test]
    fn validate_rejects_short_key() {
        let config = StorageConfig::new(Dialect::Sqlite, "sqlite://db.sqlite3", "short");
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn validate_rejects_mismatched_dsn() {
        let config = StorageConfig::new(
            Dialect::MySql,
            "postgres://localhost/auth",
            "a-very-long-encryption-key",
        );
        assert!(matches!(config.validate(), Err(StorageError::Config(_))));
    }
}
