//! # Sigil core
//!
//! Storage independent building blocks: SQL dialects, migration planning,
//! authenticated encryption of secret columns and the entity models that carry
//! secrets.

#![deny(missing_docs)]

/// Authenticated encryption and the encryption check value.
pub mod crypto;
/// SQL dialects and their capabilities.
pub mod dialect;
/// Export renderings for TOTP configurations.
pub mod export;
/// Validation errors and paging types.
pub mod model;
/// Migration definitions, registries and planning.
pub mod schema;
/// Boot time health probes.
pub mod startup;
/// TOTP configurations.
pub mod totp;
/// WebAuthn devices.
pub mod webauthn;

pub use crypto::{CryptoError, EncryptionKey, KeyCheckFailure};
pub use dialect::{Capabilities, Dialect, LockStrategy, UnknownDialect};
pub use export::ExportFormat;
pub use model::{ModelError, Page, RowFailure};
pub use schema::{
    DestroyConfirmation, Direction, EncryptionStatus, MigrationDefinition, MigrationStep, Plan,
    PlanError, Registry, RegistryError, SchemaInfo, SchemaMigration, SchemaTarget,
};
pub use startup::StartupCheck;
pub use totp::{TotpAlgorithm, TotpConfiguration, TotpGenerator};
pub use webauthn::WebauthnDevice;

pub mod prelude {
    //! The prelude module for the `sigil_core` crate.
    pub use super::{
        DestroyConfirmation, Dialect, Direction, EncryptionKey, ExportFormat, Page, Registry,
        SchemaTarget, StartupCheck, TotpAlgorithm, TotpConfiguration, TotpGenerator,
        WebauthnDevice,
    };
}
