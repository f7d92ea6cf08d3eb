//! Migration status reporting

use std::path::PathBuf;

/// One unit on disk and whether the ledger records it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Unit timestamp
    pub timestamp: i64,

    /// Full unit name
    pub name: String,

    /// File path
    pub path: PathBuf,

    /// Recorded in the ledger
    pub applied: bool,
}

/// Snapshot of the directory and the ledger
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Every unit on disk, ascending
    pub units: Vec<UnitStatus>,

    /// Most recent ledger entry, `None` when empty or uninitialized
    pub current: Option<String>,

    /// Newest unit on disk
    pub newest: Option<String>,

    /// False when the database or ledger table does not exist yet
    pub initialized: bool,
}

impl MigrationStatus {
    /// Units not recorded in the ledger
    pub fn pending(&self) -> impl Iterator<Item = &UnitStatus> {
        self.units.iter().filter(|unit| !unit.applied)
    }

    /// Number of applied units still on disk
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.units.iter().filter(|unit| unit.applied).count()
    }

    /// Check if the current level is the newest unit on disk
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.current == self.newest
    }
}
