mod common;

use secrecy::SecretString;
use sigil_core::{Direction, KeyCheckFailure, SchemaTarget, StartupCheck, WebauthnDevice};
use sigil_sql::StorageError;
use tempfile::TempDir;

fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

#[tokio::test]
async fn test_check_key_after_migration() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    let report = provider
        .schema_encryption_check_key(false)
        .await
        .expect("Active key should be valid");
    assert!(report.is_none());

    provider
        .schema_encryption_check_key_with(&secret(common::KEY), false)
        .await
        .expect("Configured key should be valid");
}

#[tokio::test]
async fn test_check_key_with_wrong_key() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    let err = provider
        .schema_encryption_check_key_with(&secret(common::OTHER_KEY), false)
        .await
        .unwrap_err();
    match err {
        StorageError::SchemaEncryptionInvalidKey { failure, report } => {
            assert_eq!(failure, KeyCheckFailure::Authentication);
            assert!(report.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_check_key_before_encryption_version() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::open(&dir).await;
    provider
        .schema_migrate(Direction::Up, SchemaTarget::Version(1), None)
        .await
        .expect("Failed to migrate");

    let err = provider
        .schema_encryption_check_key(false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::SchemaEncryptionVersionUnsupported { current: 1 }
    ));
}

#[tokio::test]
async fn test_verbose_check_reports_corrupted_rows() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    for name in ["alice", "bob", "carol"] {
        provider
            .save_totp_configuration(&common::totp(name, "JBSWY3DPEHPK3PXP"))
            .await
            .expect("Failed to save");
    }
    common::corrupt_totp_secret(&provider, "bob").await;

    let report = provider
        .schema_encryption_check_key(true)
        .await
        .expect("Check value is still valid")
        .expect("Verbose check returns a report");
    assert_eq!(report.checked, 3);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].table, "totp_configurations");
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_verbose_check_with_wrong_key_carries_report() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    provider
        .save_totp_configuration(&common::totp("alice", "JBSWY3DPEHPK3PXP"))
        .await
        .expect("Failed to save");

    let err = provider
        .schema_encryption_check_key_with(&secret(common::OTHER_KEY), true)
        .await
        .unwrap_err();
    match err {
        StorageError::SchemaEncryptionInvalidKey { report, .. } => {
            let report = report.expect("Verbose check attaches its report");
            assert_eq!(report.checked, 1);
            assert_eq!(report.failures.len(), 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_change_key_preserves_secrets() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    provider
        .save_totp_configuration(&common::totp("alice", "JBSWY3DPEHPK3PXP"))
        .await
        .expect("Failed to save");
    provider
        .save_totp_configuration(&common::totp("bob", "KRSXG5CTMVRXEZLU"))
        .await
        .expect("Failed to save");
    provider
        .save_webauthn_device(&WebauthnDevice::new(
            "alice",
            "yubikey",
            "a2lk",
            vec![1, 2, 3, 4],
        ))
        .await
        .expect("Failed to save device");

    provider
        .schema_encryption_change_key(&secret(common::OTHER_KEY))
        .await
        .expect("Failed to change key");

    let alice = provider
        .load_totp_configuration("alice")
        .await
        .expect("Failed to load after rotation");
    assert_eq!(alice.secret, b"JBSWY3DPEHPK3PXP".to_vec());
    let bob = provider.load_totp_configuration("bob").await.unwrap();
    assert_eq!(bob.secret, b"KRSXG5CTMVRXEZLU".to_vec());
    let devices = provider.load_webauthn_devices("alice").await.unwrap();
    assert_eq!(devices[0].public_key, vec![1, 2, 3, 4]);

    provider
        .schema_encryption_check_key(true)
        .await
        .expect("Rotated key is now active");
    provider
        .schema_encryption_check_key_with(&secret(common::OTHER_KEY), false)
        .await
        .expect("New key should be valid");
    let err = provider
        .schema_encryption_check_key_with(&secret(common::KEY), false)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SchemaEncryptionInvalidKey { .. }));
}

#[tokio::test]
async fn test_reopen_after_change_key_needs_new_key() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;
    provider
        .schema_encryption_change_key(&secret(common::OTHER_KEY))
        .await
        .expect("Failed to change key");
    provider.close().await;

    let stale = common::open_with_key(&dir, common::KEY).await;
    assert!(matches!(
        stale.startup_check().await.unwrap_err(),
        StorageError::SchemaEncryptionInvalidKey { .. }
    ));

    let current = common::open_with_key(&dir, common::OTHER_KEY).await;
    current
        .startup_check()
        .await
        .expect("Startup check with the new key");
}

#[tokio::test]
async fn test_change_key_rejects_short_key() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    let err = provider
        .schema_encryption_change_key(&secret("too-short"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidEncryptionKey(_)));

    provider
        .schema_encryption_check_key(false)
        .await
        .expect("Original key is untouched");
}

#[tokio::test]
async fn test_change_key_requires_latest_schema() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::open(&dir).await;
    provider
        .schema_migrate(Direction::Up, SchemaTarget::Version(2), None)
        .await
        .expect("Failed to migrate");

    let err = provider
        .schema_encryption_change_key(&secret(common::OTHER_KEY))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::OutdatedSchema {
            current: 2,
            latest: 3
        }
    ));
}

#[tokio::test]
async fn test_change_key_before_encryption_version_is_outdated() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::open(&dir).await;
    provider
        .schema_migrate(Direction::Up, SchemaTarget::Version(1), None)
        .await
        .expect("Failed to migrate");

    let err = provider
        .schema_encryption_change_key(&secret(common::OTHER_KEY))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::OutdatedSchema {
            current: 1,
            latest: 3
        }
    ));
    assert_eq!(provider.schema_version().await.unwrap(), 1);
}

#[tokio::test]
async fn test_change_key_aborts_on_undecryptable_row() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::migrated(&dir).await;

    provider
        .save_totp_configuration(&common::totp("alice", "JBSWY3DPEHPK3PXP"))
        .await
        .expect("Failed to save");
    provider
        .save_totp_configuration(&common::totp("bob", "KRSXG5CTMVRXEZLU"))
        .await
        .expect("Failed to save");
    common::corrupt_totp_secret(&provider, "bob").await;

    let err = provider
        .schema_encryption_change_key(&secret(common::OTHER_KEY))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::RowDecryption {
            table: "totp_configurations",
            ..
        }
    ));

    provider
        .schema_encryption_check_key(false)
        .await
        .expect("Original key is still valid");
    let alice = provider.load_totp_configuration("alice").await.unwrap();
    assert_eq!(alice.secret, b"JBSWY3DPEHPK3PXP".to_vec());
}

#[tokio::test]
async fn test_startup_check() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let provider = common::open(&dir).await;

    let err = provider.startup_check().await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::OutdatedSchema {
            current: 0,
            latest: 3
        }
    ));
    assert!(provider.schema_tables().await.unwrap().is_empty());

    provider
        .schema_migrate(Direction::Up, SchemaTarget::Latest, None)
        .await
        .expect("Failed to migrate");
    provider.startup_check().await.expect("Startup check passes");
}
