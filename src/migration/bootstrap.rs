//! Schema bootstrap: (re)create the target database and its ledger table

use crate::connection::Scope;
use crate::database::Database;
use crate::migration::MigrationError;
use sea_query::{ColumnDef, Table, TableCreateStatement};

#[cfg(feature = "tracing")]
use crate::telemetry::tracing_helpers;

/// `CREATE TABLE IF NOT EXISTS` statement for a ledger table named `table`.
///
/// Columns: `id SERIAL PRIMARY KEY`, `name VARCHAR(255) NOT NULL`,
/// `timestamp BIGINT NOT NULL`.
#[must_use]
pub fn ledger_table_statement(table: &str) -> TableCreateStatement {
    Table::create()
        .table(table.to_string())
        .if_not_exists()
        .col(
            ColumnDef::new("id")
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("name").string_len(255).not_null())
        .col(ColumnDef::new("timestamp").big_integer().not_null())
        .to_owned()
}

/// Drops and recreates the target database, then creates the ledger table.
///
/// This is destructive: everything in the target database is lost.
#[derive(Debug, Clone)]
pub struct SchemaBootstrapper {
    ledger_table: String,
}

impl SchemaBootstrapper {
    /// Bootstrapper creating the ledger table `ledger_table`
    #[must_use]
    pub fn new(ledger_table: impl Into<String>) -> Self {
        Self {
            ledger_table: ledger_table.into(),
        }
    }

    /// Rebuild the schema from nothing.
    ///
    /// Ends with a target-scope connection open.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Bootstrap` naming the step that failed.
    pub fn create_schema<D: Database + ?Sized>(&self, db: &mut D) -> Result<(), MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::bootstrap_span(db.target_name()).entered();

        let database = db.target_name().to_string();
        log::info!("creating schema for database {}", database);

        let result = self.run_steps(db);
        if result.is_err() {
            db.disconnect();
        }
        result
    }

    fn run_steps<D: Database + ?Sized>(&self, db: &mut D) -> Result<(), MigrationError> {
        let step = |step: &'static str| move |source| MigrationError::Bootstrap { step, source };

        db.connect(Scope::Server).map_err(step("connect to the server"))?;
        db.drop_database().map_err(step("drop the database"))?;
        db.create_database().map_err(step("create the database"))?;
        db.connect(Scope::Target).map_err(step("connect to the database"))?;
        db.create_ledger_table(&self.ledger_table)
            .map_err(step("create the ledger table"))?;

        log::debug!("ledger table {} created", self.ledger_table);
        Ok(())
    }
}
