//! In-process backend.
//!
//! State lives behind an `Arc<Mutex<_>>` so a caller can keep a [`MemoryDatabase`]
//! clone for inspection after moving another clone into a `Migrator`.

use crate::connection::Scope;
use crate::database::{Database, LockSession};
use crate::executor::{TideError, TideExecutor};
use crate::migration::LedgerEntry;
use may_postgres::types::ToSql;
use may_postgres::Row;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Backend operations that can be made to fail on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Connect,
    DropDatabase,
    CreateDatabase,
    CreateLedgerTable,
    InsertLedgerRow,
    DeleteLedgerRows,
    SuspendIntegrity,
    RestoreIntegrity,
}

/// Everything the memory backend knows, exposed for assertions.
#[derive(Debug, Default)]
pub struct MemoryState {
    /// Existing databases and, per database, ledger tables with their rows in insert order.
    pub databases: BTreeMap<String, BTreeMap<String, Vec<LedgerEntry>>>,
    /// Scope of the working connection.
    pub scope: Option<Scope>,
    /// Foreign-key enforcement on the working connection.
    pub referential_integrity: bool,
    /// Connection, DDL and integrity events in order, e.g. `connect server`.
    pub events: Vec<String>,
    /// Statements run through the executor and not rolled back.
    pub statements: Vec<String>,
    /// Held advisory lock keys.
    pub locks: HashSet<i64>,
    fail_points: HashSet<FailPoint>,
    fail_statements: Vec<String>,
    transaction: Option<Snapshot>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    tables: BTreeMap<String, Vec<LedgerEntry>>,
    statements: usize,
}

impl MemoryState {
    fn check(&self, point: FailPoint) -> Result<(), TideError> {
        if self.fail_points.contains(&point) {
            return Err(TideError::Other(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn require(&self, scope: Scope, operation: &str) -> Result<(), TideError> {
        if self.scope != Some(scope) {
            return Err(TideError::Other(format!(
                "{operation} needs a {scope} connection, current connection: {:?}",
                self.scope
            )));
        }
        Ok(())
    }

    fn tables_mut(
        &mut self,
        database: &str,
    ) -> Result<&mut BTreeMap<String, Vec<LedgerEntry>>, TideError> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| TideError::QueryError(format!("database \"{database}\" does not exist")))
    }

    fn table_mut(
        &mut self,
        database: &str,
        table: &str,
    ) -> Result<&mut Vec<LedgerEntry>, TideError> {
        self.tables_mut(database)?
            .get_mut(table)
            .ok_or_else(|| TideError::QueryError(format!("relation \"{table}\" does not exist")))
    }

    /// Applied entries of `table` in `database`, oldest first.
    #[must_use]
    pub fn ledger(&self, database: &str, table: &str) -> Option<Vec<LedgerEntry>> {
        let mut rows = self.databases.get(database)?.get(table)?.clone();
        rows.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
        Some(rows)
    }

    /// Names from [`MemoryState::ledger`].
    #[must_use]
    pub fn ledger_names(&self, database: &str, table: &str) -> Vec<String> {
        self.ledger(database, table)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }
}

/// [`Database`] implementation that keeps all state in memory.
#[derive(Clone)]
pub struct MemoryDatabase {
    name: String,
    state: Arc<Mutex<MemoryState>>,
    executor: MemoryExecutor,
}

impl MemoryDatabase {
    /// A server with no target database yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let state = Arc::new(Mutex::new(MemoryState {
            referential_integrity: true,
            ..MemoryState::default()
        }));
        Self {
            name: name.into(),
            executor: MemoryExecutor {
                state: Arc::clone(&state),
            },
            state,
        }
    }

    /// A server where the target database already exists with an empty ledger table.
    #[must_use]
    pub fn initialized(name: impl Into<String>, ledger_table: &str) -> Self {
        let db = Self::new(name);
        {
            let mut state = db.state();
            let mut tables = BTreeMap::new();
            tables.insert(ledger_table.to_string(), Vec::new());
            state.databases.insert(db.name.clone(), tables);
        }
        db
    }

    /// Lock and borrow the shared state.
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens in a failing test; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `point` fail until cleared.
    pub fn fail_at(&self, point: FailPoint) {
        self.state().fail_points.insert(point);
    }

    /// Make executor statements containing `pattern` fail.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.state().fail_statements.push(pattern.into());
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_points.clear();
        state.fail_statements.clear();
    }

    fn record(&self, event: String) {
        self.state().events.push(event);
    }
}

impl Database for MemoryDatabase {
    fn target_name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, scope: Scope) -> Result<(), TideError> {
        self.disconnect();
        let mut state = self.state();
        state.check(FailPoint::Connect)?;
        if scope == Scope::Target && !state.databases.contains_key(&self.name) {
            return Err(TideError::Connection(format!(
                "database \"{}\" does not exist",
                self.name
            )));
        }
        state.scope = Some(scope);
        state.referential_integrity = true;
        state.events.push(format!("connect {scope}"));
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state();
        if let Some(scope) = state.scope.take() {
            if let Some(snapshot) = state.transaction.take() {
                restore(&mut state, &self.name, snapshot);
            }
            state.events.push(format!("disconnect {scope}"));
        }
    }

    fn scope(&self) -> Option<Scope> {
        self.state().scope
    }

    fn executor(&self) -> Result<&dyn TideExecutor, TideError> {
        if self.state().scope.is_none() {
            return Err(TideError::Connection("not connected".to_string()));
        }
        Ok(&self.executor)
    }

    fn database_exists(&mut self) -> Result<bool, TideError> {
        if self.scope().is_none() {
            self.connect(Scope::Server)?;
        }
        Ok(self.state().databases.contains_key(&self.name))
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, TideError> {
        let state = self.state();
        state.require(Scope::Target, "table lookup")?;
        Ok(state
            .databases
            .get(&self.name)
            .is_some_and(|tables| tables.contains_key(table)))
    }

    fn drop_database(&mut self) -> Result<(), TideError> {
        {
            let mut state = self.state();
            state.require(Scope::Server, "DROP DATABASE")?;
            state.check(FailPoint::DropDatabase)?;
            state.databases.remove(&self.name);
        }
        self.record(format!("drop database {}", self.name));
        Ok(())
    }

    fn create_database(&mut self) -> Result<(), TideError> {
        {
            let mut state = self.state();
            state.require(Scope::Server, "CREATE DATABASE")?;
            state.check(FailPoint::CreateDatabase)?;
            if state.databases.contains_key(&self.name) {
                return Err(TideError::QueryError(format!(
                    "database \"{}\" already exists",
                    self.name
                )));
            }
            state.databases.insert(self.name.clone(), BTreeMap::new());
        }
        self.record(format!("create database {}", self.name));
        Ok(())
    }

    fn create_ledger_table(&mut self, table: &str) -> Result<(), TideError> {
        {
            let mut state = self.state();
            state.require(Scope::Target, "ledger creation")?;
            state.check(FailPoint::CreateLedgerTable)?;
            state
                .tables_mut(&self.name)?
                .entry(table.to_string())
                .or_default();
        }
        self.record(format!("create table {table}"));
        Ok(())
    }

    fn ledger_rows(&mut self, table: &str) -> Result<Vec<LedgerEntry>, TideError> {
        let mut state = self.state();
        state.require(Scope::Target, "ledger read")?;
        let mut rows = state.table_mut(&self.name, table)?.clone();
        rows.sort_by(|a, b| (b.timestamp, &b.name).cmp(&(a.timestamp, &a.name)));
        Ok(rows)
    }

    fn insert_ledger_row(&mut self, table: &str, entry: &LedgerEntry) -> Result<(), TideError> {
        let mut state = self.state();
        state.require(Scope::Target, "ledger insert")?;
        state.check(FailPoint::InsertLedgerRow)?;
        state.table_mut(&self.name, table)?.push(entry.clone());
        Ok(())
    }

    fn delete_ledger_rows(&mut self, table: &str, name: &str) -> Result<u64, TideError> {
        let mut state = self.state();
        state.require(Scope::Target, "ledger delete")?;
        state.check(FailPoint::DeleteLedgerRows)?;
        let rows = state.table_mut(&self.name, table)?;
        let before = rows.len();
        rows.retain(|entry| entry.name != name);
        Ok((before - rows.len()) as u64)
    }

    fn clear_ledger(&mut self, table: &str) -> Result<u64, TideError> {
        let mut state = self.state();
        state.require(Scope::Target, "ledger clear")?;
        let rows = state.table_mut(&self.name, table)?;
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }

    fn set_referential_integrity(&mut self, enabled: bool) -> Result<(), TideError> {
        let mut state = self.state();
        if state.scope.is_none() {
            return Err(TideError::Connection("not connected".to_string()));
        }
        state.check(if enabled {
            FailPoint::RestoreIntegrity
        } else {
            FailPoint::SuspendIntegrity
        })?;
        state.referential_integrity = enabled;
        state.events.push(format!(
            "referential integrity {}",
            if enabled { "on" } else { "off" }
        ));
        Ok(())
    }

    fn begin(&mut self) -> Result<(), TideError> {
        let mut state = self.state();
        state.require(Scope::Target, "BEGIN")?;
        if state.transaction.is_some() {
            return Err(TideError::Other("transaction already open".to_string()));
        }
        let tables = state.databases.get(&self.name).cloned().unwrap_or_default();
        let statements = state.statements.len();
        state.transaction = Some(Snapshot { tables, statements });
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TideError> {
        let mut state = self.state();
        state
            .transaction
            .take()
            .map(|_| ())
            .ok_or_else(|| TideError::Other("no open transaction to commit".to_string()))
    }

    fn rollback(&mut self) -> Result<(), TideError> {
        let mut state = self.state();
        let snapshot = state
            .transaction
            .take()
            .ok_or_else(|| TideError::Other("no open transaction to roll back".to_string()))?;
        restore(&mut state, &self.name, snapshot);
        Ok(())
    }

    fn lock_session(&self) -> Result<Box<dyn LockSession>, TideError> {
        Ok(Box::new(MemoryLockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

fn restore(state: &mut MemoryState, database: &str, snapshot: Snapshot) {
    if let Some(tables) = state.databases.get_mut(database) {
        *tables = snapshot.tables;
    }
    state.statements.truncate(snapshot.statements);
}

/// Executor that records statements instead of running them.
#[derive(Clone)]
struct MemoryExecutor {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryExecutor {
    fn run(&self, sql: &str) -> Result<(), TideError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pattern) = state.fail_statements.iter().find(|p| sql.contains(p.as_str())) {
            return Err(TideError::QueryError(format!(
                "injected failure for statement matching '{pattern}'"
            )));
        }
        state.statements.push(sql.trim().to_string());
        Ok(())
    }
}

impl TideExecutor for MemoryExecutor {
    fn execute(&self, query: &str, _params: &[&dyn ToSql]) -> Result<u64, TideError> {
        self.run(query).map(|()| 0)
    }

    fn query_all(&self, query: &str, _params: &[&dyn ToSql]) -> Result<Vec<Row>, TideError> {
        self.run(query).map(|()| Vec::new())
    }

    fn batch_execute(&self, sql: &str) -> Result<(), TideError> {
        self.run(sql)
    }
}

struct MemoryLockSession {
    state: Arc<Mutex<MemoryState>>,
}

impl LockSession for MemoryLockSession {
    fn try_acquire(&mut self, key: i64) -> Result<bool, TideError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(state.locks.insert(key))
    }

    fn release(&mut self, key: i64) -> Result<(), TideError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.locks.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_target_requires_database() {
        let mut db = MemoryDatabase::new("shop");
        assert!(db.connect(Scope::Target).is_err());
        assert!(!db.database_exists().unwrap());
        assert_eq!(db.scope(), Some(Scope::Server));
    }

    #[test]
    fn test_reconnect_closes_previous_connection() {
        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Server).unwrap();
        db.connect(Scope::Target).unwrap();
        db.disconnect();
        assert_eq!(
            db.state().events,
            vec!["connect server", "disconnect server", "connect target", "disconnect target"]
        );
    }

    #[test]
    fn test_ledger_rows_newest_first() {
        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Target).unwrap();
        db.insert_ledger_row("ledger", &LedgerEntry::new("2000_b", 2000)).unwrap();
        db.insert_ledger_row("ledger", &LedgerEntry::new("1000_a", 1000)).unwrap();
        db.insert_ledger_row("ledger", &LedgerEntry::new("3000_c", 3000)).unwrap();

        let names: Vec<_> = db.ledger_rows("ledger").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["3000_c", "2000_b", "1000_a"]);
    }

    #[test]
    fn test_rollback_restores_rows_and_statements() {
        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Target).unwrap();
        db.executor().unwrap().batch_execute("CREATE TABLE kept (id INT)").unwrap();

        db.begin().unwrap();
        db.executor().unwrap().batch_execute("CREATE TABLE dropped (id INT)").unwrap();
        db.insert_ledger_row("ledger", &LedgerEntry::new("1000_a", 1000)).unwrap();
        db.rollback().unwrap();

        assert!(db.ledger_rows("ledger").unwrap().is_empty());
        assert_eq!(db.state().statements, vec!["CREATE TABLE kept (id INT)"]);
    }

    #[test]
    fn test_injected_failures() {
        let mut db = MemoryDatabase::initialized("shop", "ledger");
        db.connect(Scope::Target).unwrap();
        db.fail_at(FailPoint::InsertLedgerRow);
        db.fail_statements_containing("DROP");

        assert!(db.insert_ledger_row("ledger", &LedgerEntry::new("1000_a", 1000)).is_err());
        assert!(db.executor().unwrap().batch_execute("DROP TABLE x").is_err());

        db.clear_failures();
        assert!(db.insert_ledger_row("ledger", &LedgerEntry::new("1000_a", 1000)).is_ok());
    }

    #[test]
    fn test_lock_sessions_share_keys() {
        let db = MemoryDatabase::new("shop");
        let mut first = db.lock_session().unwrap();
        let mut second = db.lock_session().unwrap();
        assert!(first.try_acquire(7).unwrap());
        assert!(!second.try_acquire(7).unwrap());
        first.release(7).unwrap();
        assert!(second.try_acquire(7).unwrap());
    }
}
