//! Migration 002: encryption check value and TOTP configurations.
//!
//! This is the version that introduces encryption at rest. The migrator writes
//! the check value for the active key inside the same transaction.

use sigil_core::{Dialect, MigrationDefinition};

const NAME: &str = "totp_configurations_encryption";

const DOWN: &[&str] = &[
    "DROP TABLE IF EXISTS totp_configurations",
    "DROP TABLE IF EXISTS encryption",
];

pub(super) const SQLITE: MigrationDefinition = MigrationDefinition {
    version: 2,
    name: NAME,
    dialect: Dialect::Sqlite,
    up: &[
        r#"
        CREATE TABLE encryption (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name VARCHAR(100) NOT NULL UNIQUE,
            value BLOB NOT NULL
        )
        "#,
        r#"
        CREATE TABLE totp_configurations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username VARCHAR(100) NOT NULL UNIQUE,
            issuer VARCHAR(100) NOT NULL,
            algorithm VARCHAR(6) NOT NULL DEFAULT 'SHA1',
            digits BIGINT NOT NULL DEFAULT 6,
            period BIGINT NOT NULL DEFAULT 30,
            secret BLOB NOT NULL,
            created_at BIGINT NOT NULL
        )
        "#,
    ],
    down: Some(DOWN),
    seeds_encryption_check: true,
};

pub(super) const POSTGRES: MigrationDefinition = MigrationDefinition {
    version: 2,
    name: NAME,
    dialect: Dialect::Postgres,
    up: &[
        r#"
        CREATE TABLE encryption (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(100) NOT NULL UNIQUE,
            value BYTEA NOT NULL
        )
        "#,
        r#"
        CREATE TABLE totp_configurations (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(100) NOT NULL UNIQUE,
            issuer VARCHAR(100) NOT NULL,
            algorithm VARCHAR(6) NOT NULL DEFAULT 'SHA1',
            digits BIGINT NOT NULL DEFAULT 6,
            period BIGINT NOT NULL DEFAULT 30,
            secret BYTEA NOT NULL,
            created_at BIGINT NOT NULL
        )
        "#,
    ],
    down: Some(DOWN),
    seeds_encryption_check: true,
};

pub(super) const MYSQL: MigrationDefinition = MigrationDefinition {
    version: 2,
    name: NAME,
    dialect: Dialect::MySql,
    up: &[
        r#"
        CREATE TABLE encryption (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            name VARCHAR(100) NOT NULL UNIQUE,
            value BLOB NOT NULL
        )
        "#,
        r#"
        CREATE TABLE totp_configurations (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            username VARCHAR(100) NOT NULL UNIQUE,
            issuer VARCHAR(100) NOT NULL,
            algorithm VARCHAR(6) NOT NULL DEFAULT 'SHA1',
            digits BIGINT NOT NULL DEFAULT 6,
            period BIGINT NOT NULL DEFAULT 30,
            secret BLOB NOT NULL,
            created_at BIGINT NOT NULL
        )
        "#,
    ],
    down: Some(DOWN),
    seeds_encryption_check: true,
};
