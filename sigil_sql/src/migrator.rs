//! Plans and applies schema migrations.

use std::time::Duration;

use sigil_core::{
    DestroyConfirmation, Direction, EncryptionKey, MigrationStep, Plan, Registry, SchemaMigration,
    SchemaTarget,
};
use sqlx::{Any, Transaction};

use crate::backend::Backend;
use crate::encryption;
use crate::error::StorageError;
use crate::version_store;

/// Moves the schema between versions of a [`Registry`].
///
/// The migrator borrows the backend; it never owns the connection pool.
/// Every step runs in its own transaction and writes exactly one history row,
/// and only one migration sequence runs against a database at a time.
#[derive(Debug)]
pub struct Migrator<'a> {
    backend: &'a Backend,
    registry: Registry,
    key: &'a EncryptionKey,
    software_version: &'a str,
    lock_timeout: Option<Duration>,
}

impl<'a> Migrator<'a> {
    /// Creates a migrator. `key` seeds the encryption check value when the
    /// migration that introduces it is applied.
    pub fn new(
        backend: &'a Backend,
        registry: Registry,
        key: &'a EncryptionKey,
        software_version: &'a str,
    ) -> Self {
        Self {
            backend,
            registry,
            key,
            software_version,
            lock_timeout: None,
        }
    }

    /// Waits up to `timeout` for another migration to finish instead of
    /// failing immediately.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// The highest version in the registry.
    pub fn latest_version(&self) -> i64 {
        self.registry.latest()
    }

    /// The version the database is at.
    pub async fn current_version(&self) -> Result<i64, StorageError> {
        version_store::current_version(self.backend).await
    }

    /// The migration history, oldest first. Empty for an untracked database.
    pub async fn history(&self) -> Result<Vec<SchemaMigration>, StorageError> {
        if self.current_version().await? <= 0 {
            return Ok(Vec::new());
        }
        let history = version_store::history(self.backend).await?;
        if history.is_empty() {
            return Err(StorageError::UnknownSchemaState(
                "the schema is tracked but has no migration history".to_string(),
            ));
        }
        Ok(history)
    }

    /// Plans a migration from the current version without applying it.
    pub async fn plan(
        &self,
        direction: Direction,
        target: SchemaTarget,
    ) -> Result<Plan, StorageError> {
        let current = self.current_version().await?;
        self.plan_from(current, direction, target)
    }

    fn plan_from(
        &self,
        current: i64,
        direction: Direction,
        target: SchemaTarget,
    ) -> Result<Plan, StorageError> {
        let plan = match direction {
            Direction::Up => self.registry.plan_up(current, target)?,
            Direction::Down => self.registry.plan_down(current, target)?,
        };
        Ok(plan)
    }

    /// Plans and applies a migration from the current version to `target`.
    ///
    /// Down migrations require `confirmation`. Returns the applied plan.
    pub async fn migrate(
        &self,
        direction: Direction,
        target: SchemaTarget,
        confirmation: Option<&DestroyConfirmation>,
    ) -> Result<Plan, StorageError> {
        if direction == Direction::Down && confirmation.is_none() {
            return Err(StorageError::DestructiveMigrationNotConfirmed);
        }

        let lock = self.backend.lock_migrations(self.lock_timeout).await?;
        let result = async {
            let current = self.current_version().await?;
            let plan = self.plan_from(current, direction, target)?;
            self.apply_steps(&plan).await?;
            Ok::<_, StorageError>(plan)
        }
        .await;
        lock.release().await;
        result
    }

    /// Applies a previously computed plan.
    ///
    /// Fails with [`StorageError::StalePlan`] if the schema moved since the
    /// plan was made.
    pub async fn apply(
        &self,
        plan: &Plan,
        confirmation: Option<&DestroyConfirmation>,
    ) -> Result<(), StorageError> {
        if plan.direction == Direction::Down && confirmation.is_none() {
            return Err(StorageError::DestructiveMigrationNotConfirmed);
        }

        let lock = self.backend.lock_migrations(self.lock_timeout).await?;
        let result = async {
            let current = self.current_version().await?;
            if current != plan.from {
                return Err(StorageError::StalePlan {
                    expected: plan.from,
                    found: current,
                });
            }
            self.apply_steps(plan).await?;
            Ok::<_, StorageError>(())
        }
        .await;
        lock.release().await;
        result
    }

    /// Runs each step in order. Must be called with the migration lock held.
    async fn apply_steps(&self, plan: &Plan) -> Result<(), StorageError> {
        if !self.backend.capabilities().transactional_ddl {
            log::warn!(
                "{} does not support transactional DDL, a failed step may leave partial changes",
                self.backend.dialect()
            );
        }

        log::info!(
            "Migrating schema {} from version {} to version {} ({} steps)",
            plan.direction,
            plan.from,
            plan.to,
            plan.steps.len()
        );

        for step in &plan.steps {
            let definition = step.definition;
            log::info!(
                "Running migration {} ({}) {}...",
                definition.version,
                definition.name,
                step.direction
            );

            let mut tx = self
                .backend
                .begin()
                .await
                .map_err(|err| step_failed(step, err))?;

            if let Err(err) = self.run_step(&mut tx, step).await {
                log::error!(
                    "Migration {} ({}) failed: {err}",
                    definition.version,
                    definition.name
                );
                if let Err(rollback) = tx.rollback().await {
                    log::warn!("Rollback failed: {rollback}");
                }
                return Err(step_failed(step, err));
            }

            tx.commit()
                .await
                .map_err(|err| step_failed(step, err.into()))?;

            log::info!(
                "Migration {} ({}) {} applied successfully, schema is at version {}",
                definition.version,
                definition.name,
                step.direction,
                step.version_after
            );
        }

        Ok(())
    }

    async fn run_step(
        &self,
        tx: &mut Transaction<'static, Any>,
        step: &MigrationStep,
    ) -> Result<(), StorageError> {
        let dialect = self.backend.dialect();

        if step.direction == Direction::Up {
            version_store::ensure_tables(tx, dialect).await?;
        }

        for statement in step.statements() {
            sqlx::query(statement).execute(&mut **tx).await?;
        }

        if step.direction == Direction::Up && step.definition.seeds_encryption_check {
            encryption::write_check_value(tx, dialect, self.key).await?;
        }

        if step.version_after < 1 {
            version_store::drop_tables(tx).await?;
        } else {
            version_store::record_step(
                tx,
                dialect,
                step.version_before,
                step.version_after,
                self.software_version,
            )
            .await?;
        }

        Ok(())
    }
}

/// Wraps an error raised while running `step` with the step's version.
fn step_failed(step: &MigrationStep, err: StorageError) -> StorageError {
    StorageError::MigrationFailed {
        version: step.definition.version,
        name: step.definition.name,
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_core::{Dialect, MigrationDefinition};

    static WEBAUTHN: MigrationDefinition = MigrationDefinition {
        version: 3,
        name: "webauthn_devices",
        dialect: Dialect::Sqlite,
        up: &["CREATE TABLE webauthn_devices (id INTEGER PRIMARY KEY)"],
        down: Some(&["DROP TABLE webauthn_devices"]),
        seeds_encryption_check: false,
    };

    #[test]
    fn unavailable_backend_is_reported_with_the_step() {
        let step = MigrationStep {
            definition: &WEBAUTHN,
            direction: Direction::Up,
            version_before: 2,
            version_after: 3,
        };

        match step_failed(&step, sqlx::Error::PoolClosed.into()) {
            StorageError::MigrationFailed {
                version,
                name,
                source,
            } => {
                assert_eq!(version, 3);
                assert_eq!(name, "webauthn_devices");
                assert!(matches!(*source, StorageError::BackendUnavailable(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
