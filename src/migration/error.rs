//! Migration-specific error types

use crate::executor::TideError;
use std::path::PathBuf;

/// Broad class of a [`MigrationError`], used to decide how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: unit names, timestamps, paths
    Validation,
    /// A referenced unit does not exist
    NotFound,
    /// The request does not fit the current ledger state
    StateConflict,
    /// Dropping/creating the database or ledger table failed
    SchemaBootstrap,
    /// A unit's hook failed
    UnitExecution,
    /// Any other database failure
    Database,
}

/// Migration-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Migration name '{0}' contains disallowed chars or is in the wrong format. Use only -_a-z0-9")]
    InvalidName(String),

    #[error("Migration timestamp '{0}' is invalid. Use only 0-9")]
    InvalidTimestamp(String),

    #[error("Migration '{0}' already exists")]
    DuplicateUnit(String),

    #[error("Migration '{name}' would share timestamp {timestamp} with '{existing}'")]
    TimestampCollision {
        name: String,
        timestamp: i64,
        existing: String,
    },

    #[error("Migrations directory {} does not exist or is not a directory", .0.display())]
    InvalidDirectory(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration '{0}' does not exist")]
    NotFound(String),

    #[error("Can't go up, migrations are up to date (current version: {current})")]
    AlreadyCurrent { current: String },

    #[error("Can't go down because the database schema is not created yet or no lower migrations exist")]
    NoLowerLevel,

    #[error("Migration '{target}' is not {expected} than the current database level ({current})")]
    InvalidTarget {
        target: String,
        current: String,
        expected: &'static str,
    },

    #[error("There are no migrations to run")]
    NoUnits,

    #[error("Applied migration '{0}' is missing from the migrations directory")]
    MissingUnit(String),

    #[error("Ledger table '{0}' does not exist")]
    LedgerAbsent(String),

    #[error(
        "Migration lock timeout: {0}\n\
         Another process may be running migrations against the same database."
    )]
    LockTimeout(String),

    #[error("Schema bootstrap failed while trying to {step}: {source}")]
    Bootstrap {
        step: &'static str,
        #[source]
        source: TideError,
    },

    #[error("Migration '{name}' failed during {hook}: {source}")]
    ExecutionFailed {
        name: String,
        hook: &'static str,
        #[source]
        source: TideError,
    },

    #[error("Database error: {0}")]
    Database(#[from] TideError),
}

impl MigrationError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::InvalidName(_)
            | MigrationError::InvalidTimestamp(_)
            | MigrationError::DuplicateUnit(_)
            | MigrationError::TimestampCollision { .. }
            | MigrationError::InvalidDirectory(_)
            | MigrationError::Io { .. } => ErrorKind::Validation,
            MigrationError::NotFound(_) => ErrorKind::NotFound,
            MigrationError::AlreadyCurrent { .. }
            | MigrationError::NoLowerLevel
            | MigrationError::InvalidTarget { .. }
            | MigrationError::NoUnits
            | MigrationError::MissingUnit(_)
            | MigrationError::LedgerAbsent(_)
            | MigrationError::LockTimeout(_) => ErrorKind::StateConflict,
            MigrationError::Bootstrap { .. } => ErrorKind::SchemaBootstrap,
            MigrationError::ExecutionFailed { .. } => ErrorKind::UnitExecution,
            MigrationError::Database(_) => ErrorKind::Database,
        }
    }

    /// Expected operator outcome rather than a fault.
    #[must_use]
    pub fn is_operator_facing(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::StateConflict
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }
}
