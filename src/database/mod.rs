//! Database seam driven by the migration engine.
//!
//! [`Database`] is the set of primitives the engine needs from a backend: scoped
//! connections, catalogue checks, bootstrap DDL, ledger rows, referential integrity
//! toggling, per-unit transactions and an executor handed to migration units.
//!
//! Two backends ship with the crate:
//!
//! - [`PostgresDatabase`] talks to PostgreSQL through `may_postgres`.
//! - [`MemoryDatabase`] keeps everything in process. It records executed statements
//!   and supports failure injection, which makes it the backend used by the engine's
//!   tests and by callers that only want to plan.

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryDatabase, MemoryState};
pub use postgres::PostgresDatabase;

use crate::connection::Scope;
use crate::executor::{TideError, TideExecutor};
use crate::migration::LedgerEntry;

/// Backend primitives used by the ledger, the bootstrapper and the engine.
///
/// A backend holds at most one working connection. [`Database::connect`] always
/// releases the previous connection before opening the next one.
pub trait Database {
    /// Name of the database being migrated.
    fn target_name(&self) -> &str;

    /// Open a connection in `scope`, closing any connection already held.
    fn connect(&mut self, scope: Scope) -> Result<(), TideError>;

    /// Close the working connection, if any.
    fn disconnect(&mut self);

    /// Scope of the working connection, `None` when disconnected.
    fn scope(&self) -> Option<Scope>;

    /// Connect in `scope` unless already connected there.
    fn ensure_connected(&mut self, scope: Scope) -> Result<(), TideError> {
        if self.scope() == Some(scope) {
            return Ok(());
        }
        self.connect(scope)
    }

    /// Executor bound to the working connection, handed to migration units.
    fn executor(&self) -> Result<&dyn TideExecutor, TideError>;

    /// Whether the target database exists. Connects in server scope if disconnected.
    fn database_exists(&mut self) -> Result<bool, TideError>;

    /// Whether `table` exists in the target database. Requires target scope.
    fn table_exists(&mut self, table: &str) -> Result<bool, TideError>;

    /// Drop the target database if it exists. Requires server scope.
    fn drop_database(&mut self) -> Result<(), TideError>;

    /// Create the target database. Requires server scope.
    fn create_database(&mut self) -> Result<(), TideError>;

    /// Create the ledger table if missing. Requires target scope.
    fn create_ledger_table(&mut self, table: &str) -> Result<(), TideError>;

    /// All ledger rows, newest first (timestamp desc, then name desc).
    fn ledger_rows(&mut self, table: &str) -> Result<Vec<LedgerEntry>, TideError>;

    /// Insert one ledger row.
    fn insert_ledger_row(&mut self, table: &str, entry: &LedgerEntry) -> Result<(), TideError>;

    /// Delete the ledger rows for `name`, returning how many were removed.
    fn delete_ledger_rows(&mut self, table: &str, name: &str) -> Result<u64, TideError>;

    /// Delete every ledger row, returning how many were removed.
    fn clear_ledger(&mut self, table: &str) -> Result<u64, TideError>;

    /// Enable or suspend foreign-key enforcement for the working connection.
    fn set_referential_integrity(&mut self, enabled: bool) -> Result<(), TideError>;

    /// Start a transaction on the working connection.
    fn begin(&mut self) -> Result<(), TideError>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), TideError>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), TideError>;

    /// Open a session for the migration lock, independent of the working connection.
    ///
    /// The lock must survive the working connection being closed and reopened
    /// during a schema rebuild, so backends give it a connection of its own.
    fn lock_session(&self) -> Result<Box<dyn LockSession>, TideError>;
}

/// Session holding (or trying to hold) the migration lock.
pub trait LockSession {
    /// Try once to take the lock identified by `key`.
    fn try_acquire(&mut self, key: i64) -> Result<bool, TideError>;

    /// Release the lock identified by `key`.
    fn release(&mut self, key: i64) -> Result<(), TideError>;
}
