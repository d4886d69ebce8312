//! Schema versions, migration definitions and migration planning.
//!
//! Everything here is pure: a [`Registry`] is a compiled in, ordered list of
//! [`MigrationDefinition`]s for one [`Dialect`], and planning a migration is a
//! lookup over that list. Executing a [`Plan`] is the job of a storage backend.
//!
//! # Versions
//!
//! * `0` means the database was never migrated.
//! * `-1` ([`PRE1`]) marks a legacy, untracked schema.
//! * Positive versions are tracked and contiguous, starting at `1`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::dialect::Dialect;

/// Version of a legacy schema that predates version tracking.
pub const PRE1: i64 = -1;

/// Operator input that confirms a destructive migration.
pub const DESTROY_CONFIRMATION: &str = "DESTROY";

/// A single registry entry.
#[derive(Debug, PartialEq, Eq)]
pub struct MigrationDefinition {
    /// Version the schema is at once this migration is applied.
    pub version: i64,
    /// Human readable name.
    pub name: &'static str,
    /// Dialect the statements are written for.
    pub dialect: Dialect,
    /// Forward statements, executed in order.
    pub up: &'static [&'static str],
    /// Backward statements. `None` makes the migration irreversible.
    pub down: Option<&'static [&'static str]>,
    /// Applying this migration introduces the encryption check value.
    pub seeds_encryption_check: bool,
}

impl MigrationDefinition {
    /// Whether a down migration through this version is possible.
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Migration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards newer versions.
    Up,
    /// Towards older versions. Destroys data.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Where a migration should end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTarget {
    /// The highest version in the registry. Up only.
    Latest,
    /// An explicit version.
    Version(i64),
    /// The legacy pre-tracking state. Down only.
    Pre1,
}

impl FromStr for SchemaTarget {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(SchemaTarget::Latest),
            "pre1" => Ok(SchemaTarget::Pre1),
            other => other
                .parse::<i64>()
                .map(|v| match v {
                    PRE1 => SchemaTarget::Pre1,
                    v => SchemaTarget::Version(v),
                })
                .map_err(|_| PlanError::InvalidTarget {
                    target: s.to_string(),
                    reason: "expected a version number, 'latest' or 'pre1'",
                }),
        }
    }
}

impl fmt::Display for SchemaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaTarget::Latest => f.write_str("latest"),
            SchemaTarget::Version(v) => write!(f, "{v}"),
            SchemaTarget::Pre1 => f.write_str("pre1"),
        }
    }
}

/// Reasons a plan cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The requested range holds no migrations.
    #[error("no migrations are available for the requested range")]
    NoAvailableMigrations,

    /// The schema is already at the target.
    #[error("the current schema version {0} is the same as the target version")]
    CurrentVersionSameAsTarget(i64),

    /// A migration on the down path has no down statements.
    #[error("migration {version} ({name}) is irreversible")]
    Irreversible {
        /// Version of the irreversible migration.
        version: i64,
        /// Name of the irreversible migration.
        name: &'static str,
    },

    /// The target is not valid for the direction.
    #[error("invalid migration target '{target}': {reason}")]
    InvalidTarget {
        /// The rejected target.
        target: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The schema is at a version this registry does not know.
    #[error("schema version {0} is not supported by this registry")]
    UnsupportedVersion(i64),
}

/// Reasons a registry is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// An entry was written for another dialect.
    #[error("migration {version} targets {found} but the registry is for {expected}")]
    DialectMismatch {
        /// Offending version.
        version: i64,
        /// Registry dialect.
        expected: Dialect,
        /// Entry dialect.
        found: Dialect,
    },

    /// Versions are not `1, 2, 3, ...`.
    #[error("migration versions must be contiguous from 1: expected {expected}, found {found}")]
    NotContiguous {
        /// The version that should come next.
        expected: i64,
        /// The version found.
        found: i64,
    },

    /// Two entries share a name.
    #[error("duplicate migration name '{0}'")]
    DuplicateName(&'static str),
}

/// One step of a plan, with the versions it moves between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationStep {
    /// The definition to run.
    pub definition: &'static MigrationDefinition,
    /// Run the `up` or `down` statements.
    pub direction: Direction,
    /// Version before the step.
    pub version_before: i64,
    /// Version after the step.
    pub version_after: i64,
}

impl MigrationStep {
    /// The statements this step executes.
    pub fn statements(&self) -> &'static [&'static str] {
        match self.direction {
            Direction::Up => self.definition.up,
            Direction::Down => self.definition.down.unwrap_or_default(),
        }
    }
}

/// An ordered list of steps from one version to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Direction of every step.
    pub direction: Direction,
    /// Version the plan starts from.
    pub from: i64,
    /// Version the plan ends at.
    pub to: i64,
    /// Steps in execution order.
    pub steps: Vec<MigrationStep>,
}

/// The compiled in migrations for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct Registry {
    dialect: Dialect,
    entries: &'static [MigrationDefinition],
}

impl Registry {
    /// Builds a registry after checking that it is well formed.
    pub fn new(
        dialect: Dialect,
        entries: &'static [MigrationDefinition],
    ) -> Result<Self, RegistryError> {
        let mut names = std::collections::HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.dialect != dialect {
                return Err(RegistryError::DialectMismatch {
                    version: entry.version,
                    expected: dialect,
                    found: entry.dialect,
                });
            }
            let expected = i as i64 + 1;
            if entry.version != expected {
                return Err(RegistryError::NotContiguous {
                    expected,
                    found: entry.version,
                });
            }
            if !names.insert(entry.name) {
                return Err(RegistryError::DuplicateName(entry.name));
            }
        }
        Ok(Self { dialect, entries })
    }

    /// Builds a registry without validation. Used for the built in registries,
    /// which are covered by tests.
    pub const fn new_unchecked(dialect: Dialect, entries: &'static [MigrationDefinition]) -> Self {
        Self { dialect, entries }
    }

    /// The registry's dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// All entries in ascending version order.
    pub fn entries(&self) -> &'static [MigrationDefinition] {
        self.entries
    }

    /// The entry for `version`.
    pub fn get(&self, version: i64) -> Option<&'static MigrationDefinition> {
        self.entries.iter().find(|m| m.version == version)
    }

    /// The highest version, or `0` for an empty registry.
    pub fn latest(&self) -> i64 {
        self.entries.last().map(|m| m.version).unwrap_or(0)
    }

    /// The version that introduced the encryption check value.
    pub fn encryption_version(&self) -> Option<i64> {
        self.entries
            .iter()
            .find(|m| m.seeds_encryption_check)
            .map(|m| m.version)
    }

    /// Resolves `target` to a concrete version for `direction`.
    pub fn resolve(&self, direction: Direction, target: SchemaTarget) -> Result<i64, PlanError> {
        let latest = self.latest();
        let invalid = |reason| PlanError::InvalidTarget {
            target: target.to_string(),
            reason,
        };
        match (direction, target) {
            (Direction::Up, SchemaTarget::Latest) => Ok(latest),
            (Direction::Up, SchemaTarget::Pre1) => {
                Err(invalid("pre1 is only valid for down migrations"))
            }
            (Direction::Up, SchemaTarget::Version(v)) if v < 1 || v > latest => {
                Err(invalid("the version is not in the registry"))
            }
            (Direction::Down, SchemaTarget::Latest) => {
                Err(invalid("latest is only valid for up migrations"))
            }
            (Direction::Down, SchemaTarget::Pre1) => Ok(PRE1),
            (Direction::Down, SchemaTarget::Version(0)) => {
                Err(invalid("use pre1 to revert every migration"))
            }
            (Direction::Down, SchemaTarget::Version(v)) if v < 0 || v > latest => {
                Err(invalid("the version is not in the registry"))
            }
            (_, SchemaTarget::Version(v)) => Ok(v),
        }
    }

    /// Plans an up migration from `from` to `target`.
    pub fn plan_up(&self, from: i64, target: SchemaTarget) -> Result<Plan, PlanError> {
        if from > self.latest() {
            return Err(PlanError::UnsupportedVersion(from));
        }
        let to = self.resolve(Direction::Up, target)?;
        if from == to {
            return Err(PlanError::CurrentVersionSameAsTarget(from));
        }
        if to < from {
            return Err(PlanError::InvalidTarget {
                target: target.to_string(),
                reason: "the target is below the current version, use a down migration",
            });
        }

        let mut before = from;
        let steps: Vec<_> = self
            .entries
            .iter()
            .filter(|m| m.version > from && m.version <= to)
            .map(|definition| {
                let step = MigrationStep {
                    definition,
                    direction: Direction::Up,
                    version_before: before,
                    version_after: definition.version,
                };
                before = definition.version;
                step
            })
            .collect();

        if steps.is_empty() {
            return Err(PlanError::NoAvailableMigrations);
        }
        Ok(Plan {
            direction: Direction::Up,
            from,
            to,
            steps,
        })
    }

    /// Plans a down migration from `from` to `target`, newest first.
    ///
    /// The whole path is checked for reversibility before returning, so an
    /// irreversible migration anywhere on it rejects the plan.
    pub fn plan_down(&self, from: i64, target: SchemaTarget) -> Result<Plan, PlanError> {
        if from > self.latest() {
            return Err(PlanError::UnsupportedVersion(from));
        }
        let to = self.resolve(Direction::Down, target)?;
        if from == to {
            return Err(PlanError::CurrentVersionSameAsTarget(from));
        }
        if to > from {
            return Err(PlanError::InvalidTarget {
                target: target.to_string(),
                reason: "the target is above the current version, use an up migration",
            });
        }
        if from < 1 {
            return Err(PlanError::NoAvailableMigrations);
        }

        let selected: Vec<&'static MigrationDefinition> = self
            .entries
            .iter()
            .rev()
            .filter(|m| m.version > to && m.version <= from)
            .collect();

        if let Some(m) = selected.iter().find(|m| !m.is_reversible()) {
            return Err(PlanError::Irreversible {
                version: m.version,
                name: m.name,
            });
        }

        let steps: Vec<_> = selected
            .into_iter()
            .map(|definition| MigrationStep {
                definition,
                direction: Direction::Down,
                version_before: definition.version,
                // Reverting version 1 lands on the target itself, which is pre1.
                version_after: if definition.version - 1 < 1 {
                    to
                } else {
                    definition.version - 1
                },
            })
            .collect();

        if steps.is_empty() {
            return Err(PlanError::NoAvailableMigrations);
        }
        Ok(Plan {
            direction: Direction::Down,
            from,
            to,
            steps,
        })
    }
}

/// One row of the migration history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigration {
    /// Monotonic id.
    pub id: i64,
    /// When the step committed.
    pub applied_at: DateTime<Utc>,
    /// Version before the step.
    pub version_before: i64,
    /// Version after the step.
    pub version_after: i64,
    /// Version of the software that ran the step.
    pub software_version: String,
}

impl SchemaMigration {
    /// Whether this row records an up step.
    pub fn is_upgrade(&self) -> bool {
        self.version_after > self.version_before
    }
}

/// State of the encryption key relative to the stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    /// The active key verifies against the check value.
    Valid,
    /// The active key does not verify.
    Invalid,
    /// The schema predates encryption support.
    Unsupported,
}

impl fmt::Display for EncryptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionStatus::Valid => f.write_str("valid"),
            EncryptionStatus::Invalid => f.write_str("invalid"),
            EncryptionStatus::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// A summary of the schema for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaInfo {
    /// Current version.
    pub version: i64,
    /// Latest version in the registry.
    pub latest: i64,
    /// Tables present.
    pub tables: Vec<String>,
    /// Whether the active key verifies.
    pub encryption: EncryptionStatus,
}

impl SchemaInfo {
    /// Whether an up migration is available.
    pub fn upgrade_available(&self) -> bool {
        self.version < self.latest
    }
}

impl fmt::Display for SchemaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let upgrade = if self.upgrade_available() {
            format!("yes - version {}", self.latest)
        } else {
            "no".to_string()
        };
        let tables = if self.tables.is_empty() {
            "N/A".to_string()
        } else {
            self.tables.join(", ")
        };
        writeln!(f, "Schema Version: {}", schema_version_to_string(self.version))?;
        writeln!(f, "Schema Upgrade Available: {upgrade}")?;
        writeln!(f, "Schema Tables: {tables}")?;
        write!(f, "Schema Encryption Key: {}", self.encryption)
    }
}

/// Renders a version for display.
pub fn schema_version_to_string(version: i64) -> String {
    match version {
        PRE1 => "pre1".to_string(),
        0 => "N/A".to_string(),
        v => v.to_string(),
    }
}

/// Operator acknowledgement that a down migration may destroy data.
///
/// The storage engine refuses down migrations without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyConfirmation {
    _acknowledged: (),
}

impl DestroyConfirmation {
    /// Accepts exactly [`DESTROY_CONFIRMATION`], ignoring a trailing line break.
    pub fn from_operator_input(input: &str) -> Option<Self> {
        (input.trim_end_matches(['\r', '\n']) == DESTROY_CONFIRMATION).then_some(Self {
            _acknowledged: (),
        })
    }

    /// An acknowledgement given up front, e.g. by a `--destroy-data` flag.
    pub fn acknowledged() -> Self {
        Self { _acknowledged: () }
    }
}
