//! SQL dialects understood by the storage engine and the capabilities each one reports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A relational engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded, file based SQLite.
    Sqlite,
    /// PostgreSQL server.
    Postgres,
    /// MySQL or MariaDB server.
    #[serde(alias = "mariadb")]
    MySql,
}

/// How a dialect serialises concurrent migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// Session scoped advisory lock (`pg_try_advisory_lock`).
    AdvisoryLock,
    /// Named user lock (`GET_LOCK`).
    NamedLock,
    /// A single guarded row in an internal lock table.
    GuardedRow,
}

/// Capabilities reported by a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `CREATE`/`ALTER`/`DROP` participate in the enclosing transaction.
    pub transactional_ddl: bool,
    /// Bind parameters are positional `$n` rather than `?`.
    pub numbered_placeholders: bool,
    /// Mechanism used for migration exclusivity.
    pub lock_strategy: LockStrategy,
}

/// Error returned when a dialect name or DSN cannot be recognised.
#[derive(Debug, thiserror::Error)]
#[error("unrecognised dialect '{0}'")]
pub struct UnknownDialect(pub String);

impl Dialect {
    /// All supported dialects.
    pub const ALL: [Dialect; 3] = [Dialect::Sqlite, Dialect::Postgres, Dialect::MySql];

    /// Infers the dialect from a connection string scheme.
    pub fn from_dsn(dsn: &str) -> Result<Self, UnknownDialect> {
        let scheme = dsn
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            _ => Err(UnknownDialect(scheme.to_string())),
        }
    }

    /// Reports what the engine can rely on for this dialect.
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Dialect::Sqlite => Capabilities {
                transactional_ddl: true,
                numbered_placeholders: false,
                lock_strategy: LockStrategy::GuardedRow,
            },
            Dialect::Postgres => Capabilities {
                transactional_ddl: true,
                numbered_placeholders: true,
                lock_strategy: LockStrategy::AdvisoryLock,
            },
            Dialect::MySql => Capabilities {
                transactional_ddl: false,
                numbered_placeholders: false,
                lock_strategy: LockStrategy::NamedLock,
            },
        }
    }

    /// Rewrites `?` placeholders into the dialect's native form.
    ///
    /// Question marks inside single quoted literals or double quoted identifiers
    /// are left alone.
    pub fn rebind(&self, query: &str) -> String {
        if !self.capabilities().numbered_placeholders {
            return query.to_string();
        }

        let mut out = String::with_capacity(query.len() + 8);
        let mut n = 0;
        let mut quote: Option<char> = None;
        for c in query.chars() {
            match (quote, c) {
                (Some(q), c) if c == q => {
                    quote = None;
                    out.push(c);
                }
                (Some(_), c) => out.push(c),
                (None, '\'' | '"') => {
                    quote = Some(c);
                    out.push(c);
                }
                (None, '?') => {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                }
                (None, c) => out.push(c),
            }
        }
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        };
        f.write_str(name)
    }
}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_numbers_placeholders_for_postgres() {
        let q = Dialect::Postgres.rebind("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(q, "SELECT * FROM t WHERE a = $1 AND b = $2");
    }

    #[test]
    fn rebind_skips_quoted_question_marks() {
        let q = Dialect::Postgres.rebind("SELECT '?' AS x, \"a?\" FROM t WHERE id = ?");
        assert_eq!(q, "SELECT '?' AS x, \"a?\" FROM t WHERE id = $1");
    }

    #[test]
    fn rebind_is_identity_for_question_mark_dialects() {
        let q = "UPDATE t SET a = ? WHERE id = ?";
        assert_eq!(Dialect::Sqlite.rebind(q), q);
        assert_eq!(Dialect::MySql.rebind(q), q);
    }

    #[test]
    fn from_dsn_detects_scheme() {
        assert_eq!(
            Dialect::from_dsn("sqlite:///tmp/db.sqlite3?mode=rwc").unwrap(),
            Dialect::Sqlite
        );
        assert_eq!(
            Dialect::from_dsn("postgresql://u:p@localhost/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(
            Dialect::from_dsn("mysql://u:p@localhost/db").unwrap(),
            Dialect::MySql
        );
        assert!(Dialect::from_dsn("redis://localhost").is_err());
        assert!(Dialect::from_dsn("no-scheme").is_err());
    }

    #[test]
    fn only_mysql_lacks_transactional_ddl() {
        assert!(Dialect::Sqlite.capabilities().transactional_ddl);
        assert!(Dialect::Postgres.capabilities().transactional_ddl);
        assert!(!Dialect::MySql.capabilities().transactional_ddl);
    }
}
