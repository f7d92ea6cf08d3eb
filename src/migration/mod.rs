//! Migration system for Tidemark
//!
//! This module provides the migration engine and its parts:
//! - [`UnitStore`]: timestamped unit files on disk
//! - [`Ledger`]: the table recording applied units
//! - [`SchemaBootstrapper`]: (re)creates the target database and ledger table
//! - [`Migrator`]: plans and executes up/down/sync/reset runs
//!
//! # Example
//!
//! ```rust,no_run
//! use tidemark::config::MigrateConfig;
//! use tidemark::migration::{Direction, Migrator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrateConfig::load()?;
//! let mut migrator = Migrator::from_config(&config)?;
//!
//! // Show what a full sync would do, then do it
//! println!("{}", migrator.migrate(Direction::Sync, true, None)?);
//! migrator.sync(false, None)?;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod error;
pub mod file;
pub mod ledger;
pub mod lock;
pub mod migrator;
pub mod record;
pub mod registry;
pub mod status;
pub mod unit;

pub use bootstrap::SchemaBootstrapper;
pub use error::{ErrorKind, MigrationError};
pub use file::{UnitDescriptor, UnitStore};
pub use ledger::Ledger;
pub use lock::MigrationLockGuard;
pub use migrator::{Direction, MigrationLog, Migrator};
pub use record::LedgerEntry;
pub use registry::UnitRegistry;
pub use status::{MigrationStatus, UnitStatus};
pub use unit::{HookOutcome, MigrationUnit, SqlScriptUnit};
