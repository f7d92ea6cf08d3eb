//! Executor Module
//!
//! Provides the `TideExecutor` trait that abstracts statement execution over `may_postgres`.
//!
//! Migration units receive a `&dyn TideExecutor` so they can run DDL and DML against
//! whichever backend the engine was built with.

use may_postgres::types::ToSql;
use may_postgres::{Client, Error as PostgresError, Row};
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::telemetry::tracing_helpers;

/// Driver-level error type
#[derive(Debug, thiserror::Error)]
pub enum TideError {
    /// `PostgreSQL` error from `may_postgres`
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[from] PostgresError),
    /// Could not open a connection
    #[error("Connection error: {0}")]
    Connection(String),
    /// Query execution error
    #[error("Query error: {0}")]
    QueryError(String),
    /// Other execution errors
    #[error("Execution error: {0}")]
    Other(String),
}

/// Trait for executing database statements
///
/// This trait abstracts statement execution, allowing different implementations
/// (direct client, in-memory recorder) to be used interchangeably by migration units.
///
/// # Examples
///
/// ```no_run
/// use tidemark::executor::{PostgresExecutor, TideExecutor, TideError};
/// use tidemark::connection::connect;
///
/// # fn main() -> Result<(), TideError> {
/// let client = connect("host=localhost user=postgres dbname=mydb")?;
/// let executor = PostgresExecutor::new(client);
///
/// executor.batch_execute("CREATE TABLE users (id SERIAL PRIMARY KEY); CREATE INDEX ON users (id);")?;
/// let rows_affected = executor.execute("DELETE FROM users WHERE id = $1", &[&42i32])?;
/// # Ok(())
/// # }
/// ```
pub trait TideExecutor {
    /// Execute a single SQL statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the statement fails.
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, TideError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `TideError` if the query fails.
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, TideError>;

    /// Execute one or more `;`-separated statements without parameters
    ///
    /// Migration scripts go through here, so a single script may contain any number
    /// of statements, including function bodies with embedded semicolons.
    ///
    /// # Errors
    ///
    /// Returns `TideError` if any statement fails. Statements before the failing
    /// one have already run unless the caller wrapped the batch in a transaction.
    fn batch_execute(&self, sql: &str) -> Result<(), TideError>;
}

/// Implementation of `TideExecutor` for `may_postgres::Client`
pub struct PostgresExecutor {
    client: Client,
}

impl PostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run a query returning a single boolean column in the first row
    pub(crate) fn query_bool(&self, query: &str) -> Result<bool, TideError> {
        let rows = self.query_all(query, &[])?;
        let row = rows
            .first()
            .ok_or_else(|| TideError::QueryError(format!("no rows returned by `{query}`")))?;
        Ok(row.get(0))
    }
}

impl TideExecutor for PostgresExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, TideError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        let start = Instant::now();
        let result = self.client.execute(query, params).map_err(TideError::from);
        log::trace!("execute took {:?}: {}", start.elapsed(), query);
        result
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, TideError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(query).entered();

        let start = Instant::now();
        let result = self.client.query(query, params).map_err(TideError::from);
        log::trace!("query took {:?}: {}", start.elapsed(), query);
        result
    }

    fn batch_execute(&self, sql: &str) -> Result<(), TideError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();

        let start = Instant::now();
        let result = self.client.batch_execute(sql).map_err(TideError::from);
        log::trace!("batch took {:?}", start.elapsed());
        result
    }
}
