//! Migration unit hooks
//!
//! A unit is anything that can move the schema one step forward or back. Units on
//! disk are SQL scripts split into an up and a down section:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE users (id SERIAL PRIMARY KEY);
//!
//! -- migrate:down
//! DROP TABLE users;
//! ```
//!
//! A script without any marker is treated as up-only. A missing section means the
//! hook is not implemented; a present but empty section is a successful no-op.

use crate::executor::{TideError, TideExecutor};
use crate::migration::MigrationError;
use std::path::Path;

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";

/// Result of invoking a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook ran and the ledger should be updated
    Applied,
    /// The unit has no hook for this direction; the ledger is left untouched
    NotImplemented,
}

/// Trait implemented by migration units
///
/// Both hooks default to [`HookOutcome::NotImplemented`]. Returning an error aborts
/// the run.
///
/// Note: the `may` runtime makes these synchronous; the executor handles coroutine
/// scheduling internally.
pub trait MigrationUnit: Send + Sync {
    /// Apply the unit.
    ///
    /// # Errors
    ///
    /// Any error returned by a statement.
    fn try_up(&self, _executor: &dyn TideExecutor) -> Result<HookOutcome, TideError> {
        Ok(HookOutcome::NotImplemented)
    }

    /// Revert the unit.
    ///
    /// # Errors
    ///
    /// Any error returned by a statement.
    fn try_down(&self, _executor: &dyn TideExecutor) -> Result<HookOutcome, TideError> {
        Ok(HookOutcome::NotImplemented)
    }
}

/// Unit backed by a SQL script with `migrate:up` / `migrate:down` sections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlScriptUnit {
    up: Option<String>,
    down: Option<String>,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlScriptUnit {
    /// Build a unit from explicit sections.
    #[must_use]
    pub fn new(up: Option<String>, down: Option<String>) -> Self {
        Self { up, down }
    }

    /// Split script text into its sections.
    #[must_use]
    pub fn parse(script: &str) -> Self {
        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        let mut preamble = String::new();
        let mut section = Section::Preamble;

        for line in script.lines() {
            match line.trim() {
                UP_MARKER => {
                    section = Section::Up;
                    up.get_or_insert_with(String::new);
                    continue;
                }
                DOWN_MARKER => {
                    section = Section::Down;
                    down.get_or_insert_with(String::new);
                    continue;
                }
                _ => {}
            }

            let target = match section {
                Section::Preamble => &mut preamble,
                Section::Up => up.get_or_insert_with(String::new),
                Section::Down => down.get_or_insert_with(String::new),
            };
            target.push_str(line);
            target.push('\n');
        }

        if up.is_none() && down.is_none() {
            // No markers at all: the whole script is the up section
            return Self {
                up: Some(preamble),
                down: None,
            };
        }

        Self { up, down }
    }

    /// Read and parse a script file.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Io` if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let script = std::fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        Ok(Self::parse(&script))
    }

    /// SQL of the up section, if present
    pub fn up_sql(&self) -> Option<&str> {
        self.up.as_deref()
    }

    /// SQL of the down section, if present
    pub fn down_sql(&self) -> Option<&str> {
        self.down.as_deref()
    }
}

fn run_section(
    section: Option<&str>,
    executor: &dyn TideExecutor,
) -> Result<HookOutcome, TideError> {
    let Some(sql) = section else {
        return Ok(HookOutcome::NotImplemented);
    };
    if !is_blank(sql) {
        executor.batch_execute(sql)?;
    }
    Ok(HookOutcome::Applied)
}

/// True if `sql` holds nothing but whitespace and `--` comments
fn is_blank(sql: &str) -> bool {
    sql.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

impl MigrationUnit for SqlScriptUnit {
    fn try_up(&self, executor: &dyn TideExecutor) -> Result<HookOutcome, TideError> {
        run_section(self.up_sql(), executor)
    }

    fn try_down(&self, executor: &dyn TideExecutor) -> Result<HookOutcome, TideError> {
        run_section(self.down_sql(), executor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Scope;
    use crate::database::{Database, MemoryDatabase};

    #[test]
    fn test_parse_sections() {
        let unit = SqlScriptUnit::parse(
            "-- Migration: 1000_users\n\
             -- migrate:up\n\
             CREATE TABLE users (id INT);\n\
             -- migrate:down\n\
             DROP TABLE users;\n",
        );
        assert_eq!(unit.up_sql(), Some("CREATE TABLE users (id INT);\n"));
        assert_eq!(unit.down_sql(), Some("DROP TABLE users;\n"));
    }

    #[test]
    fn test_parse_without_markers_is_up_only() {
        let unit = SqlScriptUnit::parse("CREATE TABLE t (id INT);");
        assert_eq!(unit.up_sql(), Some("CREATE TABLE t (id INT);\n"));
        assert_eq!(unit.down_sql(), None);
    }

    #[test]
    fn test_parse_missing_down_section() {
        let unit = SqlScriptUnit::parse("-- migrate:up\nSELECT 1;\n");
        assert!(unit.up_sql().is_some());
        assert!(unit.down_sql().is_none());
    }

    #[test]
    fn test_hooks_run_against_executor() {
        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Target).unwrap();
        let executor = db.executor().unwrap();

        let unit = SqlScriptUnit::parse("-- migrate:up\nCREATE TABLE a (id INT);\n-- migrate:down\n\n");
        assert_eq!(unit.try_up(executor).unwrap(), HookOutcome::Applied);
        // Empty down section is a no-op that still counts as applied
        assert_eq!(unit.try_down(executor).unwrap(), HookOutcome::Applied);

        let up_only = SqlScriptUnit::parse("-- migrate:up\nCREATE TABLE b (id INT);\n");
        assert_eq!(up_only.try_down(executor).unwrap(), HookOutcome::NotImplemented);

        assert_eq!(db.state().statements, vec!["CREATE TABLE a (id INT);"]);
    }

    #[test]
    fn test_default_hooks_are_not_implemented() {
        struct Empty;
        impl MigrationUnit for Empty {}

        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Target).unwrap();
        let executor = db.executor().unwrap();
        assert_eq!(Empty.try_up(executor).unwrap(), HookOutcome::NotImplemented);
        assert_eq!(Empty.try_down(executor).unwrap(), HookOutcome::NotImplemented);
    }
}
