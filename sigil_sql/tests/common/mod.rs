#![allow(dead_code)]

use sigil_core::{Dialect, DestroyConfirmation, Direction, SchemaTarget, TotpConfiguration};
use sigil_sql::{SqlProvider, StorageConfig};
use tempfile::TempDir;

pub const KEY: &str = "an-encryption-key-used-only-in-tests";
pub const OTHER_KEY: &str = "a-different-encryption-key-for-tests";

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sqlite_dsn(dir: &TempDir) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("sigil.sqlite3").display()
    )
}

pub fn sqlite_config(dir: &TempDir, key: &str) -> StorageConfig {
    StorageConfig::new(Dialect::Sqlite, sqlite_dsn(dir), key).with_software_version("test-1.0.0")
}

pub async fn open(dir: &TempDir) -> SqlProvider {
    open_with_key(dir, KEY).await
}

pub async fn open_with_key(dir: &TempDir, key: &str) -> SqlProvider {
    init_logger();
    SqlProvider::open(sqlite_config(dir, key))
        .await
        .expect("Failed to open sqlite provider")
}

/// Opens a provider and migrates it to the latest schema.
pub async fn migrated(dir: &TempDir) -> SqlProvider {
    let provider = open(dir).await;
    provider
        .schema_migrate(Direction::Up, SchemaTarget::Latest, None)
        .await
        .expect("Failed to migrate to latest");
    provider
}

pub fn destroy() -> DestroyConfirmation {
    DestroyConfirmation::from_operator_input("DESTROY").expect("DESTROY is accepted")
}

pub fn totp(username: &str, secret: &str) -> TotpConfiguration {
    TotpConfiguration::new(username, secret)
}

/// Overwrites a stored secret with bytes that will not authenticate.
pub async fn corrupt_totp_secret(provider: &SqlProvider, username: &str) {
    sqlx::query("UPDATE totp_configurations SET secret = ? WHERE username = ?")
        .bind(vec![7u8; 48])
        .bind(username)
        .execute(provider.backend().pool())
        .await
        .expect("Failed to corrupt secret");
}
