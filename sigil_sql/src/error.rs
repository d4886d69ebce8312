//! The error taxonomy returned by every storage operation.

use sigil_core::{CryptoError, KeyCheckFailure, ModelError, PlanError};

use crate::encryption::KeyCheckReport;

/// Errors returned by the storage provider.
///
/// Callers branch on the variant. Backend specific errors are folded into
/// [`StorageError::BackendUnavailable`] or [`StorageError::Database`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(#[source] sqlx::Error),

    /// A statement failed.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// The version store is missing or malformed while other tables exist.
    #[error("unknown schema state: {0}")]
    UnknownSchemaState(String),

    /// The requested range holds no migrations.
    #[error("no migrations are available for the requested range")]
    NoAvailableMigrations,

    /// The schema is already at the requested version.
    #[error("the current schema version {0} is the same as the target version")]
    CurrentVersionSameAsTarget(i64),

    /// A down migration would cross a migration without down statements.
    #[error("migration {version} ({name}) is irreversible, choose a target above it")]
    IrreversibleMigration {
        /// Version of the irreversible migration.
        version: i64,
        /// Name of the irreversible migration.
        name: &'static str,
    },

    /// The target is not valid for the direction.
    #[error("{0}")]
    InvalidMigrationTarget(String),

    /// Another migration holds the migration lock.
    #[error("another migration is in progress")]
    MigrationInProgress,

    /// A down migration was requested without an operator confirmation.
    #[error("down migrations destroy data and require explicit confirmation")]
    DestructiveMigrationNotConfirmed,

    /// A plan was built against a version the schema is no longer at.
    #[error("the migration plan starts at version {expected} but the schema is at version {found}")]
    StalePlan {
        /// Version the plan starts from.
        expected: i64,
        /// Version found when applying.
        found: i64,
    },

    /// A migration step failed and was rolled back.
    #[error("migration {version} ({name}) failed: {source}")]
    MigrationFailed {
        /// Version of the failed step.
        version: i64,
        /// Name of the failed step.
        name: &'static str,
        /// Underlying failure.
        source: Box<StorageError>,
    },

    /// The schema is at a version this build does not know.
    #[error("schema version {0} is not supported by this version of the software")]
    UnsupportedSchemaVersion(i64),

    /// The operation requires the latest schema.
    #[error("schema is version {current} which is outdated please migrate to version {latest} in order to use this command or use an older binary")]
    OutdatedSchema {
        /// Current version.
        current: i64,
        /// Latest version.
        latest: i64,
    },

    /// The schema predates encryption support.
    #[error("schema version {current} does not support the encryption check value")]
    SchemaEncryptionVersionUnsupported {
        /// Current version.
        current: i64,
    },

    /// The key does not verify against the stored check value.
    #[error("the encryption key is not valid against the schema check value: {failure}")]
    SchemaEncryptionInvalidKey {
        /// Why the key was rejected.
        failure: KeyCheckFailure,
        /// Per row diagnostics when requested.
        report: Option<Box<KeyCheckReport>>,
    },

    /// A candidate encryption key was rejected before use.
    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),

    /// A stored secret could not be decrypted.
    #[error("could not decrypt {table} row {row_id}: {source}")]
    RowDecryption {
        /// Table of the row.
        table: &'static str,
        /// Row id.
        row_id: i64,
        /// Underlying failure.
        source: CryptoError,
    },

    /// The user has no TOTP configuration.
    #[error("no TOTP configuration for user '{0}'")]
    NoTotpConfiguration(String),

    /// The user already has a TOTP configuration and overwrite was not requested.
    #[error("user '{0}' already has a TOTP configuration, use force to overwrite it")]
    TotpConfigurationExists(String),

    /// The user has no device with the given description.
    #[error("no WebAuthn device '{description}' for user '{username}'")]
    NoWebauthnDevice {
        /// Owner.
        username: String,
        /// Device description.
        description: String,
    },

    /// Encryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// An entity failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The configuration is invalid.
    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// An argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Writing output failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The provider was closed.
    #[error("the storage provider is closed")]
    Closed,
}

impl StorageError {
    /// Informational outcomes that mean "nothing to do".
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            StorageError::NoAvailableMigrations | StorageError::CurrentVersionSameAsTarget(_)
        )
    }

    /// Failures worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::MigrationInProgress | StorageError::BackendUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::BackendUnavailable(err),
            other => StorageError::Database(other),
        }
    }
}

impl From<PlanError> for StorageError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::NoAvailableMigrations => StorageError::NoAvailableMigrations,
            PlanError::CurrentVersionSameAsTarget(v) => StorageError::CurrentVersionSameAsTarget(v),
            PlanError::Irreversible { version, name } => {
                StorageError::IrreversibleMigration { version, name }
            }
            err @ PlanError::InvalidTarget { .. } => {
                StorageError::InvalidMigrationTarget(err.to_string())
            }
            PlanError::UnsupportedVersion(v) => StorageError::UnsupportedSchemaVersion(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_are_backend_unavailable() {
        assert!(matches!(
            StorageError::from(sqlx::Error::PoolTimedOut),
            StorageError::BackendUnavailable(_)
        ));
        assert!(matches!(
            StorageError::from(sqlx::Error::RowNotFound),
            StorageError::Database(_)
        ));
        assert!(StorageError::from(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn plan_errors_keep_their_kind() {
        assert!(StorageError::from(PlanError::NoAvailableMigrations).is_noop());
        assert!(StorageError::from(PlanError::CurrentVersionSameAsTarget(3)).is_noop());
        assert!(matches!(
            StorageError::from(PlanError::Irreversible {
                version: 2,
                name: "two"
            }),
            StorageError::IrreversibleMigration { version: 2, .. }
        ));
    }

    #[test]
    fn outdated_schema_message() {
        let err = StorageError::OutdatedSchema {
            current: 1,
            latest: 3,
        };
        assert_eq!(
            err.to_string(),
            "schema is version 1 which is outdated please migrate to version 3 in order to use this command or use an older binary"
        );
    }
}
