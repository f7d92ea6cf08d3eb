//! Ledger - the table of applied units

use crate::connection::Scope;
use crate::database::Database;
use crate::migration::file::UnitDescriptor;
use crate::migration::{LedgerEntry, MigrationError};

/// Access to the ledger table of the target database.
///
/// Every method takes the backend explicitly so the ledger never holds a connection
/// of its own.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Ledger {
    /// Ledger stored in `table`
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    /// Name of the ledger table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether both the target database and the ledger table exist.
    ///
    /// Leaves a target-scope connection open when the database exists.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` on driver failure.
    pub fn exists<D: Database + ?Sized>(&self, db: &mut D) -> Result<bool, MigrationError> {
        if db.scope() != Some(Scope::Target) && !db.database_exists()? {
            return Ok(false);
        }
        db.ensure_connected(Scope::Target)?;
        Ok(db.table_exists(&self.table)?)
    }

    fn require<D: Database + ?Sized>(&self, db: &mut D) -> Result<(), MigrationError> {
        if !self.exists(db)? {
            return Err(MigrationError::LedgerAbsent(self.table.clone()));
        }
        Ok(())
    }

    /// Every entry, newest first.
    ///
    /// # Errors
    ///
    /// `LedgerAbsent` if the database or table is missing.
    pub fn all<D: Database + ?Sized>(
        &self,
        db: &mut D,
    ) -> Result<Vec<LedgerEntry>, MigrationError> {
        self.require(db)?;
        Ok(db.ledger_rows(&self.table)?)
    }

    /// The current level: the entry with the greatest timestamp (ties by name).
    ///
    /// # Errors
    ///
    /// `LedgerAbsent` if the database or table is missing.
    pub fn most_recent<D: Database + ?Sized>(
        &self,
        db: &mut D,
    ) -> Result<Option<LedgerEntry>, MigrationError> {
        Ok(self.all(db)?.into_iter().next())
    }

    /// Whether `name` is recorded as applied.
    ///
    /// # Errors
    ///
    /// `LedgerAbsent` if the database or table is missing.
    pub fn contains<D: Database + ?Sized>(
        &self,
        db: &mut D,
        name: &str,
    ) -> Result<bool, MigrationError> {
        Ok(self.all(db)?.iter().any(|entry| entry.name == name))
    }

    /// Record `unit` as applied. Expects a target-scope connection.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the insert fails.
    pub fn record_applied<D: Database + ?Sized>(
        &self,
        db: &mut D,
        unit: &UnitDescriptor,
    ) -> Result<(), MigrationError> {
        self.record_entry(db, &LedgerEntry::from(unit))
    }

    /// Insert `entry` as is. Expects a target-scope connection.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the insert fails.
    pub fn record_entry<D: Database + ?Sized>(
        &self,
        db: &mut D,
        entry: &LedgerEntry,
    ) -> Result<(), MigrationError> {
        db.insert_ledger_row(&self.table, entry)?;
        log::debug!("ledger: recorded {}", entry.name);
        Ok(())
    }

    /// Remove `name` from the ledger, returning whether a row was deleted.
    /// Expects a target-scope connection.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Database` if the delete fails.
    pub fn record_reverted<D: Database + ?Sized>(
        &self,
        db: &mut D,
        name: &str,
    ) -> Result<bool, MigrationError> {
        let deleted = db.delete_ledger_rows(&self.table, name)?;
        log::debug!("ledger: removed {} ({} row(s))", name, deleted);
        Ok(deleted > 0)
    }

    /// Delete every entry without touching the schema.
    ///
    /// # Errors
    ///
    /// `LedgerAbsent` if the database or table is missing.
    pub fn clear<D: Database + ?Sized>(&self, db: &mut D) -> Result<u64, MigrationError> {
        self.require(db)?;
        let removed = db.clear_ledger(&self.table)?;
        log::info!("ledger: cleared {} entr{}", removed, if removed == 1 { "y" } else { "ies" });
        Ok(removed)
    }
}
