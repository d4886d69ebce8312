//! Walks a fresh SQLite database through the schema lifecycle: migrate, store
//! TOTP configurations, rotate the encryption key, export and revert.
//!
//! Run with `RUST_LOG=info cargo run --example schema-lifecycle`.

use secrecy::SecretString;
use sigil::prelude::*;

const KEY: &str = "the-initial-encryption-key";
const NEW_KEY: &str = "the-rotated-encryption-key";

struct DemoGenerator;

impl TotpGenerator for DemoGenerator {
    fn generate(&self, username: &str) -> Result<TotpConfiguration, sigil::core::ModelError> {
        Ok(TotpConfiguration::new(username, "JBSWY3DPEHPK3PXP")
            .with_algorithm(TotpAlgorithm::Sha256))
    }
}

#[tokio::main]
async fn main() -> Result<(), StorageError> {
    env_logger::init();

    let path = std::env::temp_dir().join(format!("sigil-demo-{}.sqlite3", std::process::id()));
    let dsn = format!("sqlite://{}?mode=rwc", path.display());
    let provider = SqlProvider::open(StorageConfig::new(Dialect::Sqlite, dsn, KEY)).await?;

    if let Err(err) = provider.startup_check().await {
        log::info!("Startup check before migrating: {err}");
    }

    let plan = provider
        .schema_migrate(Direction::Up, SchemaTarget::Latest, None)
        .await?;
    log::info!("Migrated from {} to {}", plan.from, plan.to);
    println!("{}", provider.schema_info().await?);

    provider
        .generate_totp_configuration(&DemoGenerator, "alice", false)
        .await?;
    provider
        .save_totp_configuration(&TotpConfiguration::new("bob", "KRSXG5CTMVRXEZLU").with_digits(8))
        .await?;

    provider
        .schema_encryption_change_key(&SecretString::from(NEW_KEY.to_string()))
        .await?;
    let report = provider.schema_encryption_check_key(true).await?;
    if let Some(report) = report {
        log::info!("Verified {} encrypted values", report.checked);
    }

    let mut stdout = tokio::io::stdout();
    let summary = provider
        .export_totp_configurations(ExportFormat::Uri, &mut stdout)
        .await?;
    log::info!("Exported {} configurations", summary.exported);

    for migration in provider.schema_migration_history().await? {
        log::info!(
            "{} -> {}",
            migration.version_before,
            migration.version_after
        );
    }

    provider
        .schema_migrate(
            Direction::Down,
            SchemaTarget::Pre1,
            Some(&DestroyConfirmation::acknowledged()),
        )
        .await?;

    provider.close().await;
    std::fs::remove_file(&path)?;
    Ok(())
}
