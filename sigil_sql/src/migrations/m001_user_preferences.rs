//! Migration 001: first tracked version.
//!
//! Creates the per user second factor preference table. Applying it also
//! creates the version tracking tables, which is what makes a database
//! "version 1".

use sigil_core::{Dialect, MigrationDefinition};

const NAME: &str = "user_preferences";

pub(super) const SQLITE: MigrationDefinition = MigrationDefinition {
    version: 1,
    name: NAME,
    dialect: Dialect::Sqlite,
    up: &[r#"
        CREATE TABLE user_preferences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username VARCHAR(100) NOT NULL UNIQUE,
            second_factor_method VARCHAR(11) NOT NULL
        )
        "#],
    down: Some(&["DROP TABLE IF EXISTS user_preferences"]),
    seeds_encryption_check: false,
};

pub(super) const POSTGRES: MigrationDefinition = MigrationDefinition {
    version: 1,
    name: NAME,
    dialect: Dialect::Postgres,
    up: &[r#"
        CREATE TABLE user_preferences (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(100) NOT NULL UNIQUE,
            second_factor_method VARCHAR(11) NOT NULL
        )
        "#],
    down: Some(&["DROP TABLE IF EXISTS user_preferences"]),
    seeds_encryption_check: false,
};

pub(super) const MYSQL: MigrationDefinition = MigrationDefinition {
    version: 1,
    name: NAME,
    dialect: Dialect::MySql,
    up: &[r#"
        CREATE TABLE user_preferences (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            username VARCHAR(100) NOT NULL UNIQUE,
            second_factor_method VARCHAR(11) NOT NULL
        )
        "#],
    down: Some(&["DROP TABLE IF EXISTS user_preferences"]),
    seeds_encryption_check: false,
};
