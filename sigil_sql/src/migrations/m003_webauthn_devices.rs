//! Migration 003: WebAuthn devices, whose public keys share the column encryption.

use sigil_core::{Dialect, MigrationDefinition};

const NAME: &str = "webauthn_devices";

const DOWN: &[&str] = &["DROP TABLE IF EXISTS webauthn_devices"];

pub(super) const SQLITE: MigrationDefinition = MigrationDefinition {
    version: 3,
    name: NAME,
    dialect: Dialect::Sqlite,
    up: &[r#"
        CREATE TABLE webauthn_devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username VARCHAR(100) NOT NULL,
            description VARCHAR(64) NOT NULL,
            kid VARCHAR(512) NOT NULL,
            public_key BLOB NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE (username, description)
        )
        "#],
    down: Some(DOWN),
    seeds_encryption_check: false,
};

pub(super) const POSTGRES: MigrationDefinition = MigrationDefinition {
    version: 3,
    name: NAME,
    dialect: Dialect::Postgres,
    up: &[r#"
        CREATE TABLE webauthn_devices (
            id BIGSERIAL PRIMARY KEY,
            username VARCHAR(100) NOT NULL,
            description VARCHAR(64) NOT NULL,
            kid VARCHAR(512) NOT NULL,
            public_key BYTEA NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE (username, description)
        )
        "#],
    down: Some(DOWN),
    seeds_encryption_check: false,
};

pub(super) const MYSQL: MigrationDefinition = MigrationDefinition {
    version: 3,
    name: NAME,
    dialect: Dialect::MySql,
    up: &[r#"
        CREATE TABLE webauthn_devices (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            username VARCHAR(100) NOT NULL,
            description VARCHAR(64) NOT NULL,
            kid VARCHAR(512) NOT NULL,
            public_key BLOB NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE KEY webauthn_devices_lookup (username, description)
        )
        "#],
    down: Some(DOWN),
    seeds_encryption_check: false,
};
