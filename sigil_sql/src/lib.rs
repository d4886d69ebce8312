//! # Sigil SQL storage
//!
//! Versioned schema management and encryption at rest over SQLite, PostgreSQL
//! and MySQL. [`SqlProvider`] is the entry point; the other public types are
//! the components it delegates to.

#![deny(missing_docs)]

/// Pooled connection and migration lock
pub mod backend;

/// Storage configuration
pub mod config;

/// Encryption key validation and rotation
pub mod encryption;

/// Storage error taxonomy
pub mod error;

/// Bulk export of TOTP configurations
pub mod export;

/// Built in migrations for every dialect
pub mod migrations;

/// Migration planning and execution
pub mod migrator;

/// The storage provider facade
pub mod provider;

/// TOTP configuration persistence
pub mod totp_store;

/// Schema version and history tables
pub mod version_store;

/// WebAuthn device persistence
pub mod webauthn_store;

pub use backend::{Backend, MigrationLock};
pub use config::{PoolConfig, StorageConfig};
pub use encryption::{EncryptionManager, KeyCheckReport, SecretColumn};
pub use error::StorageError;
pub use export::{EXPORT_PAGE_SIZE, ExportSummary};
pub use migrator::Migrator;
pub use provider::SqlProvider;
pub use totp_store::TotpStore;
pub use webauthn_store::WebauthnStore;
