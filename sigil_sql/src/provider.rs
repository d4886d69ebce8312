//! The storage provider facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::Stream;
use secrecy::{ExposeSecret, SecretString};
use sigil_core::{
    DestroyConfirmation, Dialect, Direction, EncryptionKey, EncryptionStatus, Page, Plan,
    Registry, SchemaInfo, SchemaMigration, SchemaTarget, StartupCheck, TotpConfiguration,
    TotpGenerator, WebauthnDevice,
};
use tokio::sync::RwLock;

use crate::backend::Backend;
use crate::config::StorageConfig;
use crate::encryption::{EncryptionManager, KeyCheckReport};
use crate::error::StorageError;
use crate::migrations;
use crate::migrator::Migrator;
use crate::totp_store::TotpStore;
use crate::webauthn_store::WebauthnStore;

/// The single entry point to persistent storage.
///
/// The provider owns the connection pool and the active encryption key. Schema
/// operations go to the [`Migrator`], key operations to the
/// [`EncryptionManager`] and entity operations to the entity stores, all of
/// which borrow the provider's backend for the duration of one call.
///
/// The active key sits behind a read/write lock: entity and migration calls
/// hold it for reading, and a key change holds it for writing so no in-process
/// writer observes a half rotated state.
#[derive(Debug)]
pub struct SqlProvider {
    backend: Backend,
    registry: Registry,
    key: RwLock<EncryptionKey>,
    software_version: String,
    lock_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl SqlProvider {
    /// Connects with the built in migrations for the configured dialect.
    pub async fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let registry = migrations::registry(config.dialect);
        Self::with_registry(config, registry).await
    }

    /// Connects with a custom migration registry.
    pub async fn with_registry(
        config: StorageConfig,
        registry: Registry,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        if registry.dialect() != config.dialect {
            return Err(StorageError::Config(format!(
                "the migration registry is for {} but the dialect is {}",
                registry.dialect(),
                config.dialect
            )));
        }

        let backend = Backend::connect(&config).await?;
        log::info!(
            "Opened {} storage, latest schema version is {}",
            config.dialect,
            registry.latest()
        );

        Ok(Self {
            backend,
            registry,
            key: RwLock::new(EncryptionKey::derive(config.encryption_key.expose_secret())),
            lock_timeout: config.migration_lock_timeout(),
            software_version: config.software_version,
            closed: AtomicBool::new(false),
        })
    }

    /// Releases every connection. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backend.close().await;
        log::info!("Closed {} storage", self.backend.dialect());
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) || self.backend.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// The backend adapter.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The active dialect.
    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    fn migrator<'a>(&'a self, key: &'a EncryptionKey) -> Migrator<'a> {
        Migrator::new(&self.backend, self.registry, key, &self.software_version)
            .with_lock_timeout(self.lock_timeout)
    }

    fn encryption(&self) -> EncryptionManager<'_> {
        EncryptionManager::new(&self.backend, self.registry)
    }

    // Schema operations

    /// The current schema version.
    pub async fn schema_version(&self) -> Result<i64, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.migrator(&key).current_version().await
    }

    /// The latest schema version known to this build. No I/O.
    pub fn schema_latest_version(&self) -> i64 {
        self.registry.latest()
    }

    /// The tables currently present.
    pub async fn schema_tables(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_open()?;
        self.backend.tables().await
    }

    /// Migrates the schema. Down migrations require `confirmation`.
    pub async fn schema_migrate(
        &self,
        direction: Direction,
        target: SchemaTarget,
        confirmation: Option<&DestroyConfirmation>,
    ) -> Result<Plan, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.migrator(&key)
            .migrate(direction, target, confirmation)
            .await
    }

    /// Previews the up migrations to `target` without applying them.
    pub async fn schema_migrations_up(&self, target: SchemaTarget) -> Result<Plan, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.migrator(&key).plan(Direction::Up, target).await
    }

    /// Previews the down migrations to `target` without applying them.
    pub async fn schema_migrations_down(
        &self,
        target: SchemaTarget,
    ) -> Result<Plan, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.migrator(&key).plan(Direction::Down, target).await
    }

    /// The migration history, oldest first.
    pub async fn schema_migration_history(&self) -> Result<Vec<SchemaMigration>, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.migrator(&key).history().await
    }

    /// A summary of the schema and the active key's status.
    pub async fn schema_info(&self) -> Result<SchemaInfo, StorageError> {
        self.ensure_open()?;
        let version = self.schema_version().await?;
        let tables = self.backend.tables().await?;
        let encryption = match self.schema_encryption_check_key(false).await {
            Ok(_) => EncryptionStatus::Valid,
            Err(StorageError::SchemaEncryptionInvalidKey { .. }) => EncryptionStatus::Invalid,
            Err(StorageError::SchemaEncryptionVersionUnsupported { .. }) => {
                EncryptionStatus::Unsupported
            }
            Err(err) => return Err(err),
        };

        Ok(SchemaInfo {
            version,
            latest: self.registry.latest(),
            tables,
            encryption,
        })
    }

    // Encryption operations

    /// Checks the active key.
    pub async fn schema_encryption_check_key(
        &self,
        verbose: bool,
    ) -> Result<Option<KeyCheckReport>, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        self.encryption().check_key(&key, verbose).await
    }

    /// Checks a candidate key supplied by the operator.
    pub async fn schema_encryption_check_key_with(
        &self,
        candidate: &SecretString,
        verbose: bool,
    ) -> Result<Option<KeyCheckReport>, StorageError> {
        self.ensure_open()?;
        let key = EncryptionKey::derive(candidate.expose_secret());
        self.encryption().check_key(&key, verbose).await
    }

    /// Re-encrypts all secrets under `new_key` and makes it the active key.
    ///
    /// Persisting `new_key` in the service configuration is the caller's job.
    pub async fn schema_encryption_change_key(
        &self,
        new_key: &SecretString,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut active = self.key.write().await;
        let rotated = self.encryption().change_key(&active, new_key).await?;
        *active = rotated;
        Ok(())
    }

    // TOTP configurations

    /// Loads the TOTP configuration of `username`.
    pub async fn load_totp_configuration(
        &self,
        username: &str,
    ) -> Result<TotpConfiguration, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        TotpStore::new(&self.backend, &key).load(username).await
    }

    /// Saves `config`, replacing any existing configuration of the same user.
    pub async fn save_totp_configuration(
        &self,
        config: &TotpConfiguration,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        TotpStore::new(&self.backend, &key).save(config).await
    }

    /// Deletes the TOTP configuration of `username`.
    pub async fn delete_totp_configuration(&self, username: &str) -> Result<(), StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        TotpStore::new(&self.backend, &key).delete(username).await
    }

    /// Reads one page of TOTP configurations ordered by id.
    pub async fn load_totp_configurations(
        &self,
        page_size: usize,
        page: usize,
    ) -> Result<Page<TotpConfiguration>, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        TotpStore::new(&self.backend, &key)
            .list(page_size, page)
            .await
    }

    /// Streams every page of TOTP configurations, ending after the first
    /// short page. An empty trailing page is not yielded unless the table is
    /// empty. The stream starts over from the first page each time it is
    /// created.
    pub fn totp_configuration_pages(
        &self,
        page_size: usize,
    ) -> impl Stream<Item = Result<Page<TotpConfiguration>, StorageError>> + Send + '_ {
        try_stream! {
            let mut page = 0;
            loop {
                let current = self.load_totp_configurations(page_size, page).await?;
                if page > 0 && current.is_empty() {
                    break;
                }
                let last = current.is_last();
                yield current;
                if last {
                    break;
                }
                page += 1;
            }
        }
    }

    /// Generates and saves a new TOTP configuration for `username`.
    ///
    /// Refuses to replace an existing configuration unless `force` is set.
    pub async fn generate_totp_configuration(
        &self,
        generator: &dyn TotpGenerator,
        username: &str,
        force: bool,
    ) -> Result<TotpConfiguration, StorageError> {
        if !force {
            match self.load_totp_configuration(username).await {
                Ok(_) => return Err(StorageError::TotpConfigurationExists(username.to_string())),
                Err(StorageError::NoTotpConfiguration(_)) => {}
                Err(err) => return Err(err),
            }
        }

        let config = generator.generate(username)?;
        if config.username != username {
            return Err(StorageError::InvalidArgument(format!(
                "the generator returned a configuration for '{}' instead of '{username}'",
                config.username
            )));
        }
        self.save_totp_configuration(&config).await?;
        log::info!("Generated TOTP configuration for {username}");
        self.load_totp_configuration(username).await
    }

    // WebAuthn devices

    /// Saves a WebAuthn device.
    pub async fn save_webauthn_device(&self, device: &WebauthnDevice) -> Result<(), StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        WebauthnStore::new(&self.backend, &key).save(device).await
    }

    /// Loads the WebAuthn devices of `username`.
    pub async fn load_webauthn_devices(
        &self,
        username: &str,
    ) -> Result<Vec<WebauthnDevice>, StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        WebauthnStore::new(&self.backend, &key).load(username).await
    }

    /// Deletes a WebAuthn device.
    pub async fn delete_webauthn_device(
        &self,
        username: &str,
        description: &str,
    ) -> Result<(), StorageError> {
        self.ensure_open()?;
        let key = self.key.read().await;
        WebauthnStore::new(&self.backend, &key)
            .delete(username, description)
            .await
    }

    /// Fails unless the schema is at the latest version.
    pub(crate) async fn require_latest_schema(&self) -> Result<(), StorageError> {
        let current = self.schema_version().await?;
        let latest = self.registry.latest();
        if current != latest {
            return Err(StorageError::OutdatedSchema { current, latest });
        }
        Ok(())
    }
}

#[async_trait]
impl StartupCheck for SqlProvider {
    type Error = StorageError;

    /// Verifies connectivity, a known and current schema version and, once the
    /// schema has encryption, the active key. Never mutates anything.
    async fn startup_check(&self) -> Result<(), Self::Error> {
        self.ensure_open()?;
        self.backend.ping().await?;

        let current = self.schema_version().await?;
        let latest = self.registry.latest();
        if current > latest {
            return Err(StorageError::UnsupportedSchemaVersion(current));
        }
        if current < latest {
            return Err(StorageError::OutdatedSchema { current, latest });
        }

        if self.registry.encryption_version().is_some() {
            self.schema_encryption_check_key(false).await?;
        }

        log::debug!("Storage startup check passed at schema version {current}");
        Ok(())
    }
}
