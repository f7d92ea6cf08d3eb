//! `LedgerEntry` - one row of the ledger table

use crate::migration::file::UnitDescriptor;

/// A unit recorded as applied in the ledger table
///
/// The table's surrogate `id` column is not carried here; ordering always uses
/// `timestamp` (then `name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerEntry {
    /// Full unit name, `<timestamp>_<slug>`
    pub name: String,

    /// Unit timestamp, mirrored from the name prefix
    pub timestamp: i64,
}

impl LedgerEntry {
    /// Create a new `LedgerEntry`
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
        }
    }
}

impl From<&UnitDescriptor> for LedgerEntry {
    fn from(unit: &UnitDescriptor) -> Self {
        Self::new(unit.name.clone(), unit.timestamp)
    }
}
