//! Migrator - Core migration execution engine

use crate::config::{MigrateConfig, MigrationsConfig};
use crate::database::{Database, PostgresDatabase};
use crate::migration::bootstrap::SchemaBootstrapper;
use crate::migration::file::{is_valid_name, parse_name, UnitDescriptor, UnitStore};
use crate::migration::ledger::Ledger;
use crate::migration::lock::MigrationLockGuard;
use crate::migration::{
    HookOutcome, LedgerEntry, MigrationError, MigrationStatus, MigrationUnit, UnitRegistry,
    UnitStatus,
};
use std::collections::HashSet;
use std::fmt;

#[cfg(feature = "tracing")]
use crate::telemetry::tracing_helpers;

/// Shown as the current version when the ledger is empty or missing
pub const NO_VERSION: &str = "-- none --";

/// Logged when the engine finds no database or ledger table
pub const BOOTSTRAP_MESSAGE: &str =
    "Database or ledger table does not exist; creating migration schema.";

/// What a `migrate` call should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply the next pending unit, or every pending unit up to a target
    Up,
    /// Revert the current unit, or every unit above a target
    Down,
    /// Apply every pending unit
    Sync,
    /// Recreate the schema with an empty ledger
    Reset,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Sync => "sync",
            Direction::Reset => "reset",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lines describing what a `migrate` call did, or would do in a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationLog {
    lines: Vec<String>,
}

impl MigrationLog {
    fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::debug!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl fmt::Display for MigrationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Up,
    Down,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Up => "up",
            Hook::Down => "down",
        }
    }
}

/// One planned transition
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Up(UnitDescriptor),
    Down(UnitDescriptor),
    /// Recreate the schema; carries the unit it reverts, if any
    Rebuild(Option<UnitDescriptor>),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Up(unit) => write!(f, "Run migration {} (up)", unit.name),
            Step::Down(unit) => write!(f, "Run migration {} (down)", unit.name),
            Step::Rebuild(Some(unit)) => write!(f, "Rebuild schema (revert {})", unit.name),
            Step::Rebuild(None) => f.write_str("Rebuild schema (reset)"),
        }
    }
}

/// Core migration execution engine
///
/// The `Migrator` combines the unit store, the ledger and the schema bootstrapper
/// over one [`Database`] backend. It keeps no state between calls: every
/// `migrate` re-reads the directory and the ledger.
pub struct Migrator<D: Database> {
    config: MigrationsConfig,
    store: UnitStore,
    ledger: Ledger,
    bootstrapper: SchemaBootstrapper,
    registry: UnitRegistry,
    database: D,
}

impl Migrator<PostgresDatabase> {
    /// Build a PostgreSQL-backed migrator from loaded configuration.
    ///
    /// No connection is opened until the first operation.
    ///
    /// # Errors
    ///
    /// `Database` if the connection descriptor is invalid, `InvalidDirectory` if the
    /// migrations directory does not exist.
    pub fn from_config(config: &MigrateConfig) -> Result<Self, MigrationError> {
        let database = PostgresDatabase::new(config.database.clone())?;
        Self::new(config.migrations.clone(), database)
    }
}

impl<D: Database> Migrator<D> {
    /// Create a migrator over `database`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDirectory` if the migrations directory does not exist.
    pub fn new(config: MigrationsConfig, database: D) -> Result<Self, MigrationError> {
        let store = UnitStore::open(&config.directory, config.extension.clone())?;
        Ok(Self {
            ledger: Ledger::new(config.ledger_table.clone()),
            bootstrapper: SchemaBootstrapper::new(config.ledger_table.clone()),
            registry: UnitRegistry::new(),
            store,
            config,
            database,
        })
    }

    /// Replace the registry of code-defined units
    #[must_use]
    pub fn with_registry(mut self, registry: UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut UnitRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &MigrationsConfig {
        &self.config
    }

    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut D {
        &mut self.database
    }

    /// Apply the next pending unit, or all pending units up to `target`.
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate`].
    pub fn up(
        &mut self,
        dry_run: bool,
        target: Option<&str>,
    ) -> Result<MigrationLog, MigrationError> {
        self.migrate(Direction::Up, dry_run, target)
    }

    /// Revert the current unit, or all units above `target`.
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate`].
    pub fn down(
        &mut self,
        dry_run: bool,
        target: Option<&str>,
    ) -> Result<MigrationLog, MigrationError> {
        self.migrate(Direction::Down, dry_run, target)
    }

    /// Apply every pending unit, or those up to `target`.
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate`].
    pub fn sync(
        &mut self,
        dry_run: bool,
        target: Option<&str>,
    ) -> Result<MigrationLog, MigrationError> {
        self.migrate(Direction::Sync, dry_run, target)
    }

    /// Recreate the schema with an empty ledger.
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate`].
    pub fn reset(&mut self, dry_run: bool) -> Result<MigrationLog, MigrationError> {
        self.migrate(Direction::Reset, dry_run, None)
    }

    /// Move the schema in `direction`.
    ///
    /// In a dry run nothing is locked, bootstrapped, executed or recorded; the log
    /// lists what would happen.
    ///
    /// # Errors
    ///
    /// - `NoUnits` when the directory is empty (except for `Reset`)
    /// - `NotFound` / `InvalidName` for an unknown or malformed `target`
    /// - `AlreadyCurrent`, `NoLowerLevel`, `InvalidTarget` when the request does not
    ///   fit the current level
    /// - `MissingUnit` when the current level is no longer on disk
    /// - `LockTimeout` when another process holds the migration lock
    /// - `Bootstrap` / `ExecutionFailed` / `Database` when execution fails; units
    ///   applied before the failure stay recorded
    pub fn migrate(
        &mut self,
        direction: Direction,
        dry_run: bool,
        target: Option<&str>,
    ) -> Result<MigrationLog, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_span(direction.as_str(), dry_run).entered();

        log::debug!("migrate {} (dry run: {})", direction, dry_run);
        let _lock = if dry_run { None } else { Some(self.lock()?) };

        let mut log = MigrationLog::default();
        match direction {
            Direction::Reset => {
                if let Some(target) = target {
                    log::warn!("reset ignores target {}", target);
                }
                self.read_level(&mut log)?;
                let step = Step::Rebuild(None);
                log.push(step.to_string());
                if !dry_run {
                    self.perform(step)?;
                }
            }
            _ => self.migrate_units(direction, dry_run, target, &mut log)?,
        }
        Ok(log)
    }

    fn migrate_units(
        &mut self,
        direction: Direction,
        dry_run: bool,
        target: Option<&str>,
        log: &mut MigrationLog,
    ) -> Result<(), MigrationError> {
        let units = self.store.list()?;
        if units.is_empty() {
            return Err(MigrationError::NoUnits);
        }

        let (initialized, current) = self.read_level(log)?;

        let current_index = current
            .map(|entry| {
                units
                    .iter()
                    .position(|unit| unit.name == entry.name)
                    .ok_or(MigrationError::MissingUnit(entry.name))
            })
            .transpose()?;
        let target_index = target.map(|name| locate(&units, name)).transpose()?;

        let steps = plan(direction, &units, current_index, target_index)?;

        if dry_run {
            for step in &steps {
                log.push(step.to_string());
            }
            return Ok(());
        }

        if !initialized {
            self.bootstrapper.create_schema(&mut self.database)?;
        }

        self.with_integrity_suspended(|this| {
            for step in steps {
                log.push(step.to_string());
                this.perform(step)?;
            }
            Ok(())
        })
    }

    /// Log the current level, and the bootstrap notice when there is no ledger yet.
    fn read_level(
        &mut self,
        log: &mut MigrationLog,
    ) -> Result<(bool, Option<LedgerEntry>), MigrationError> {
        let initialized = self.ledger.exists(&mut self.database)?;
        let current = if initialized {
            self.ledger.most_recent(&mut self.database)?
        } else {
            log.push(BOOTSTRAP_MESSAGE);
            None
        };
        log.push(format!(
            "Current version is: {}",
            current.as_ref().map_or(NO_VERSION, |entry| entry.name.as_str())
        ));
        Ok((initialized, current))
    }

    fn perform(&mut self, step: Step) -> Result<(), MigrationError> {
        match step {
            Step::Up(unit) => self.run_unit(&unit, Hook::Up),
            Step::Down(unit) => self.run_unit(&unit, Hook::Down),
            Step::Rebuild(reverting) => {
                if let Some(unit) = reverting {
                    log::info!("reverting first migration {} by rebuilding the schema", unit.name);
                }
                self.bootstrapper.create_schema(&mut self.database)
            }
        }
    }

    fn run_unit(&mut self, unit: &UnitDescriptor, hook: Hook) -> Result<(), MigrationError> {
        let implementation = self.registry.resolve(unit)?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::hook_span(&unit.name, hook.as_str()).entered();

        if self.config.transactional {
            self.transaction(|this| this.invoke(unit, implementation.as_ref(), hook))
        } else {
            self.invoke(unit, implementation.as_ref(), hook)
        }
    }

    fn invoke(
        &mut self,
        unit: &UnitDescriptor,
        implementation: &dyn MigrationUnit,
        hook: Hook,
    ) -> Result<(), MigrationError> {
        let executor = self.database.executor()?;
        let outcome = match hook {
            Hook::Up => implementation.try_up(executor),
            Hook::Down => implementation.try_down(executor),
        }
        .map_err(|source| MigrationError::ExecutionFailed {
            name: unit.name.clone(),
            hook: hook.as_str(),
            source,
        })?;

        match (outcome, hook) {
            (HookOutcome::NotImplemented, _) => {
                log::warn!(
                    "migration {} has no {} step; ledger left unchanged",
                    unit.name,
                    hook.as_str()
                );
            }
            (HookOutcome::Applied, Hook::Up) => {
                self.ledger.record_applied(&mut self.database, unit)?;
                log::info!("applied migration {}", unit.name);
            }
            (HookOutcome::Applied, Hook::Down) => {
                self.ledger.record_reverted(&mut self.database, &unit.name)?;
                log::info!("reverted migration {}", unit.name);
            }
        }
        Ok(())
    }

    /// Run `f` inside a transaction on the working connection.
    fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        self.database.begin()?;
        match f(self) {
            Ok(value) => {
                self.database.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.database.rollback() {
                    log::warn!("rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Run `f` with foreign-key enforcement suspended, restoring it afterwards even
    /// when `f` fails.
    fn with_integrity_suspended<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, MigrationError>,
    ) -> Result<T, MigrationError> {
        self.database.set_referential_integrity(false)?;
        log::debug!("referential integrity suspended");

        let result = f(self);

        // A failed rebuild can leave no connection, and then there is nothing to restore
        let restored = match self.database.scope() {
            Some(_) => self.database.set_referential_integrity(true),
            None => Ok(()),
        };

        match (result, restored) {
            (Ok(value), Ok(())) => {
                log::debug!("referential integrity restored");
                Ok(value)
            }
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                log::warn!("failed to restore referential integrity: {}", restore);
                Err(e)
            }
        }
    }

    fn lock(&self) -> Result<MigrationLockGuard, MigrationError> {
        MigrationLockGuard::acquire(
            &self.database,
            self.ledger.table(),
            self.config.lock_timeout_seconds,
        )
    }

    /// Every unit on disk with its applied flag, plus current and newest levels.
    ///
    /// Never bootstraps: an uninitialized database reports nothing applied.
    ///
    /// # Errors
    ///
    /// Directory or database failures.
    pub fn status(&mut self) -> Result<MigrationStatus, MigrationError> {
        let units = self.store.list()?;
        let initialized = self.ledger.exists(&mut self.database)?;
        let applied = if initialized {
            self.ledger.all(&mut self.database)?
        } else {
            Vec::new()
        };

        let applied_names: HashSet<&str> =
            applied.iter().map(|entry| entry.name.as_str()).collect();
        let newest = units.last().map(|unit| unit.name.clone());
        let units = units
            .into_iter()
            .map(|unit| UnitStatus {
                applied: applied_names.contains(unit.name.as_str()),
                timestamp: unit.timestamp,
                name: unit.name,
                path: unit.path,
            })
            .collect();

        Ok(MigrationStatus {
            units,
            current: applied.first().map(|entry| entry.name.clone()),
            newest,
            initialized,
        })
    }

    /// Create a new unit file. See [`UnitStore::create`].
    ///
    /// # Errors
    ///
    /// Validation errors from the store.
    pub fn create(
        &self,
        slug: &str,
        timestamp: Option<&str>,
    ) -> Result<UnitDescriptor, MigrationError> {
        self.store.create(slug, timestamp)
    }

    /// Delete a unit file and its ledger row, if any.
    ///
    /// The schema is left as it is; the current level only changes if `name` was it.
    /// The ledger row is only deleted once the file is gone.
    ///
    /// # Errors
    ///
    /// `InvalidName`, `NotFound`, `LockTimeout`, `Io`, or database failures.
    pub fn remove(&mut self, name: &str) -> Result<(), MigrationError> {
        self.store.get(name)?;
        let _lock = self.lock()?;

        if !self.ledger.exists(&mut self.database)? {
            return self.store.remove(name);
        }
        self.transaction(|this| {
            let recorded = this.ledger.record_reverted(&mut this.database, name)?;
            this.store.remove(name)?;
            if recorded {
                log::info!("removed {} from the ledger", name);
            }
            Ok(())
        })
    }

    /// Rename a unit file, re-keying its ledger row when it is applied.
    ///
    /// The ledger is re-keyed first and committed only after the file has moved.
    ///
    /// # Errors
    ///
    /// Validation errors from [`UnitStore::rename`], `LockTimeout`, or database failures.
    pub fn rename(
        &mut self,
        name: &str,
        new_name: &str,
    ) -> Result<UnitDescriptor, MigrationError> {
        self.store.get(name)?;
        let _lock = self.lock()?;

        let applied = self.ledger.exists(&mut self.database)?
            && self.ledger.contains(&mut self.database, name)?;
        if !applied || name == new_name {
            return self.store.rename(name, new_name);
        }

        let entry = LedgerEntry::new(new_name, parse_name(new_name)?);
        let renamed = self.transaction(|this| {
            this.ledger.record_reverted(&mut this.database, name)?;
            this.ledger.record_entry(&mut this.database, &entry)?;
            this.store.rename(name, new_name)
        })?;
        log::info!("ledger entry {} renamed to {}", name, renamed.name);
        Ok(renamed)
    }

    /// Empty the ledger without touching the schema.
    ///
    /// # Errors
    ///
    /// `LedgerAbsent`, `LockTimeout`, or database failures.
    pub fn clear_ledger(&mut self) -> Result<u64, MigrationError> {
        let _lock = self.lock()?;
        self.ledger.clear(&mut self.database)
    }
}

/// Index of `name` in `units`.
fn locate(units: &[UnitDescriptor], name: &str) -> Result<usize, MigrationError> {
    if !is_valid_name(name) {
        return Err(MigrationError::InvalidName(name.to_string()));
    }
    units
        .iter()
        .position(|unit| unit.name == name)
        .ok_or_else(|| MigrationError::NotFound(name.to_string()))
}

/// Steps moving from `current` towards `target` (both indices into `units`).
fn plan(
    direction: Direction,
    units: &[UnitDescriptor],
    current: Option<usize>,
    target: Option<usize>,
) -> Result<Vec<Step>, MigrationError> {
    let level = |index: Option<usize>| {
        index.map_or_else(|| NO_VERSION.to_string(), |i| units[i].name.clone())
    };

    match direction {
        Direction::Up | Direction::Sync => {
            if let Some(t) = target.filter(|&t| current.is_some_and(|c| t <= c)) {
                return Err(MigrationError::InvalidTarget {
                    target: units[t].name.clone(),
                    current: level(current),
                    expected: "newer",
                });
            }
            let first = current.map_or(0, |c| c + 1);
            if first >= units.len() {
                return Err(MigrationError::AlreadyCurrent { current: level(current) });
            }
            let last = match target {
                Some(t) => t,
                None if direction == Direction::Up => first,
                None => units.len() - 1,
            };
            Ok(units[first..=last].iter().cloned().map(Step::Up).collect())
        }
        Direction::Down => {
            let Some(c) = current else {
                return Err(MigrationError::NoLowerLevel);
            };
            let stop = match target {
                Some(t) if t >= c => {
                    return Err(MigrationError::InvalidTarget {
                        target: units[t].name.clone(),
                        current: level(current),
                        expected: "older",
                    });
                }
                Some(t) => t + 1,
                None => c,
            };
            // The first unit is never reverted by its own down step
            Ok((stop..=c)
                .rev()
                .map(|i| match i {
                    0 => Step::Rebuild(Some(units[i].clone())),
                    _ => Step::Down(units[i].clone()),
                })
                .collect())
        }
        Direction::Reset => Ok(vec![Step::Rebuild(None)]),
    }
}
