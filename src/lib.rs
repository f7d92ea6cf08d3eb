//! # Tidemark
//!
//! Timestamp-ordered schema migrations for PostgreSQL on the `may` runtime.
//!
//! Units live in a directory as `<timestamp>_<slug>.sql` files, a ledger table in
//! the target database records which of them are applied, and the [`Migrator`]
//! moves the schema between the two: up, down, sync to the newest unit, or reset.
//!
//! See [`migration`] for the engine and [`database`] for the backend seam.

pub mod config;
pub mod connection;
pub mod database;
pub mod executor;
pub mod migration;
mod telemetry;

pub use config::{ConnectionConfig, MigrateConfig, MigrationsConfig};
pub use connection::Scope;
pub use database::{Database, MemoryDatabase, PostgresDatabase};
pub use executor::{TideError, TideExecutor};
pub use migration::{Direction, MigrationError, MigrationLog, Migrator};
