//! Compiled in schema migrations for every supported dialect.
//!
//! Each migration lives in its own `mXXX_description.rs` file and defines one
//! [`MigrationDefinition`] per dialect. The SQL is plain data: selecting the
//! registry for a dialect is a lookup, and the [`crate::Migrator`] never
//! branches on the dialect to decide what to run.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sigil_core::Dialect;
//! use sigil_sql::migrations;
//!
//! let registry = migrations::registry(Dialect::Postgres);
//! println!("Latest version: {}", registry.latest());
//! ```
//!
//! # Adding New Migrations
//!
//! 1. Create a new file `mXXX_description.rs` in this directory
//! 2. Define `SQLITE`, `POSTGRES` and `MYSQL` with the next version number
//! 3. Append them to the three arrays in this file

mod m001_user_preferences;
mod m002_totp_encryption;
mod m003_webauthn_devices;

use sigil_core::{Dialect, MigrationDefinition, Registry};

/// All SQLite migrations in order. Add new migrations to the end.
static SQLITE_MIGRATIONS: &[MigrationDefinition] = &[
    m001_user_preferences::SQLITE,
    m002_totp_encryption::SQLITE,
    m003_webauthn_devices::SQLITE,
];

/// All PostgreSQL migrations in order. Add new migrations to the end.
static POSTGRES_MIGRATIONS: &[MigrationDefinition] = &[
    m001_user_preferences::POSTGRES,
    m002_totp_encryption::POSTGRES,
    m003_webauthn_devices::POSTGRES,
];

/// All MySQL migrations in order. Add new migrations to the end.
static MYSQL_MIGRATIONS: &[MigrationDefinition] = &[
    m001_user_preferences::MYSQL,
    m002_totp_encryption::MYSQL,
    m003_webauthn_devices::MYSQL,
];

/// The built in registry for `dialect`.
pub fn registry(dialect: Dialect) -> Registry {
    let entries = match dialect {
        Dialect::Sqlite => SQLITE_MIGRATIONS,
        Dialect::Postgres => POSTGRES_MIGRATIONS,
        Dialect::MySql => MYSQL_MIGRATIONS,
    };
    Registry::new_unchecked(dialect, entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registries_are_well_formed() {
        for dialect in Dialect::ALL {
            let checked = Registry::new(dialect, registry(dialect).entries());
            assert!(checked.is_ok(), "{dialect} registry: {checked:?}");
        }
    }

    #[test]
    fn dialects_share_versions_and_names() {
        let sqlite: Vec<(i64, &str)> = SQLITE_MIGRATIONS
            .iter()
            .map(|m| (m.version, m.name))
            .collect();
        for dialect in [Dialect::Postgres, Dialect::MySql] {
            let other: Vec<(i64, &str)> = registry(dialect)
                .entries()
                .iter()
                .map(|m| (m.version, m.name))
                .collect();
            assert_eq!(sqlite, other, "{dialect} registry differs from sqlite");
        }
    }

    #[test]
    fn encryption_is_introduced_once() {
        for dialect in Dialect::ALL {
            let seeding = registry(dialect)
                .entries()
                .iter()
                .filter(|m| m.seeds_encryption_check)
                .count();
            assert_eq!(seeding, 1);
            assert_eq!(registry(dialect).encryption_version(), Some(2));
        }
    }

    #[test]
    fn all_built_in_migrations_are_reversible() {
        for dialect in Dialect::ALL {
            for migration in registry(dialect).entries() {
                assert!(
                    migration.is_reversible(),
                    "Migration {} ({}) should have down statements",
                    migration.version,
                    migration.name
                );
            }
        }
    }

    #[test]
    fn latest_version_is_three() {
        for dialect in Dialect::ALL {
            assert_eq!(registry(dialect).latest(), 3);
        }
    }
}
