//! PostgreSQL backend on `may_postgres`.

use crate::config::ConnectionConfig;
use crate::connection::{connect, Scope};
use crate::database::{Database, LockSession};
use crate::executor::{PostgresExecutor, TideError, TideExecutor};
use crate::migration::bootstrap::ledger_table_statement;
use crate::migration::LedgerEntry;
use sea_query::{Expr, ExprTrait, Order, PostgresQueryBuilder, Query};

/// [`Database`] implementation backed by a single `may_postgres` client.
pub struct PostgresDatabase {
    config: ConnectionConfig,
    executor: Option<PostgresExecutor>,
    scope: Option<Scope>,
    in_transaction: bool,
}

impl PostgresDatabase {
    /// Create a disconnected backend for `config`.
    ///
    /// # Errors
    ///
    /// Returns `TideError::Connection` if the descriptor is invalid.
    pub fn new(config: ConnectionConfig) -> Result<Self, TideError> {
        config.validate()?;
        Ok(Self {
            config,
            executor: None,
            scope: None,
            in_transaction: false,
        })
    }

    /// Connection descriptor this backend was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn require(&self, scope: Scope, operation: &str) -> Result<&PostgresExecutor, TideError> {
        match (&self.executor, self.scope) {
            (Some(executor), Some(current)) if current == scope => Ok(executor),
            (_, current) => Err(TideError::Other(format!(
                "{operation} needs a {scope} connection, current connection: {}",
                current.map_or_else(|| "none".to_string(), |s| s.to_string())
            ))),
        }
    }

    fn working(&self) -> Result<&PostgresExecutor, TideError> {
        self.executor
            .as_ref()
            .ok_or_else(|| TideError::Connection("not connected".to_string()))
    }
}

impl Drop for PostgresDatabase {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Double-quote an identifier for statements sea-query cannot build.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Database for PostgresDatabase {
    fn target_name(&self) -> &str {
        &self.config.database
    }

    fn connect(&mut self, scope: Scope) -> Result<(), TideError> {
        self.disconnect();
        let client = connect(&self.config.connection_string(scope))?;
        self.executor = Some(PostgresExecutor::new(client));
        self.scope = Some(scope);
        log::debug!("opened {} connection", scope);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(executor) = self.executor.take() {
            // Dropping the client closes the socket; the server aborts any open transaction
            drop(executor);
            if let Some(scope) = self.scope {
                log::debug!("closed {} connection", scope);
            }
        }
        self.scope = None;
        self.in_transaction = false;
    }

    fn scope(&self) -> Option<Scope> {
        self.scope
    }

    fn executor(&self) -> Result<&dyn TideExecutor, TideError> {
        Ok(self.working()? as &dyn TideExecutor)
    }

    fn database_exists(&mut self) -> Result<bool, TideError> {
        if self.scope.is_none() {
            self.connect(Scope::Server)?;
        }
        let sql = Query::select()
            .expr(Expr::val(1))
            .from("pg_database")
            .and_where(Expr::col("datname").eq(self.config.database.clone()))
            .to_string(PostgresQueryBuilder);
        Ok(!self.working()?.query_all(&sql, &[])?.is_empty())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, TideError> {
        let executor = self.require(Scope::Target, "table lookup")?;
        let sql = Query::select()
            .expr(Expr::val(1))
            .from(("information_schema", "tables"))
            .and_where(Expr::col("table_schema").eq(Expr::cust("current_schema()")))
            .and_where(Expr::col("table_name").eq(table.to_string()))
            .to_string(PostgresQueryBuilder);
        Ok(!executor.query_all(&sql, &[])?.is_empty())
    }

    fn drop_database(&mut self) -> Result<(), TideError> {
        let executor = self.require(Scope::Server, "DROP DATABASE")?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&self.config.database));
        executor.batch_execute(&sql)
    }

    fn create_database(&mut self) -> Result<(), TideError> {
        let executor = self.require(Scope::Server, "CREATE DATABASE")?;
        let sql = format!("CREATE DATABASE {}", quote_ident(&self.config.database));
        executor.batch_execute(&sql)
    }

    fn create_ledger_table(&mut self, table: &str) -> Result<(), TideError> {
        let executor = self.require(Scope::Target, "ledger creation")?;
        let sql = ledger_table_statement(table).to_string(PostgresQueryBuilder);
        executor.batch_execute(&sql)
    }

    fn ledger_rows(&mut self, table: &str) -> Result<Vec<LedgerEntry>, TideError> {
        let executor = self.require(Scope::Target, "ledger read")?;
        let sql = Query::select()
            .columns(["name", "timestamp"])
            .from(table.to_string())
            .order_by("timestamp", Order::Desc)
            .order_by("name", Order::Desc)
            .to_string(PostgresQueryBuilder);

        let rows = executor.query_all(&sql, &[])?;
        Ok(rows
            .iter()
            .map(|row| LedgerEntry::new(row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect())
    }

    fn insert_ledger_row(&mut self, table: &str, entry: &LedgerEntry) -> Result<(), TideError> {
        let executor = self.require(Scope::Target, "ledger insert")?;
        let mut insert = Query::insert();
        insert
            .into_table(table.to_string())
            .columns(["name", "timestamp"]);
        insert
            .values([entry.name.clone().into(), entry.timestamp.into()])
            .map_err(|e| TideError::QueryError(format!("ledger insert: {e}")))?;
        executor.execute(&insert.to_string(PostgresQueryBuilder), &[])?;
        Ok(())
    }

    fn delete_ledger_rows(&mut self, table: &str, name: &str) -> Result<u64, TideError> {
        let executor = self.require(Scope::Target, "ledger delete")?;
        let sql = Query::delete()
            .from_table(table.to_string())
            .and_where(Expr::col("name").eq(name.to_string()))
            .to_string(PostgresQueryBuilder);
        executor.execute(&sql, &[])
    }

    fn clear_ledger(&mut self, table: &str) -> Result<u64, TideError> {
        let executor = self.require(Scope::Target, "ledger clear")?;
        let sql = Query::delete()
            .from_table(table.to_string())
            .to_string(PostgresQueryBuilder);
        executor.execute(&sql, &[])
    }

    fn set_referential_integrity(&mut self, enabled: bool) -> Result<(), TideError> {
        // `replica` disables FK triggers for this session; needs superuser or replication role
        let sql = if enabled {
            "SET session_replication_role = DEFAULT"
        } else {
            "SET session_replication_role = replica"
        };
        self.working()?.batch_execute(sql)
    }

    fn begin(&mut self) -> Result<(), TideError> {
        if self.in_transaction {
            return Err(TideError::Other("transaction already open".to_string()));
        }
        self.working()?.batch_execute("BEGIN")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TideError> {
        if !self.in_transaction {
            return Err(TideError::Other("no open transaction to commit".to_string()));
        }
        self.in_transaction = false;
        self.working()?.batch_execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), TideError> {
        if !self.in_transaction {
            return Err(TideError::Other("no open transaction to roll back".to_string()));
        }
        self.in_transaction = false;
        self.working()?.batch_execute("ROLLBACK")
    }

    fn lock_session(&self) -> Result<Box<dyn LockSession>, TideError> {
        let client = connect(&self.config.connection_string(Scope::Server))?;
        Ok(Box::new(AdvisoryLockSession {
            executor: PostgresExecutor::new(client),
        }))
    }
}

/// Session-level advisory lock held on a dedicated server-scope connection.
///
/// Closing the connection releases the lock server-side, so a crashed run never
/// leaves it behind.
struct AdvisoryLockSession {
    executor: PostgresExecutor,
}

impl LockSession for AdvisoryLockSession {
    fn try_acquire(&mut self, key: i64) -> Result<bool, TideError> {
        self.executor
            .query_bool(&format!("SELECT pg_try_advisory_lock({key})"))
    }

    fn release(&mut self, key: i64) -> Result<(), TideError> {
        let released = self
            .executor
            .query_bool(&format!("SELECT pg_advisory_unlock({key})"))?;
        if !released {
            log::warn!("advisory lock {} was not held at release", key);
        }
        Ok(())
    }
}
