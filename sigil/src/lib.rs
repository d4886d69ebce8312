//! # Sigil
//!
//! Storage schema lifecycle and encryption at rest for authentication servers.

#![deny(missing_docs)]

pub use sigil_core as core;

#[cfg(feature = "sql")]
/// SQL storage provider.
pub mod sql {
    //! Re-exports the `sigil_sql` crate.
    pub use sigil_sql::*;
}

pub mod prelude {
    //! The prelude module for the `sigil` crate.
    pub use sigil_core::prelude::*;

    #[cfg(feature = "sql")]
    pub use sigil_sql::{ExportSummary, KeyCheckReport, SqlProvider, StorageConfig, StorageError};
}
