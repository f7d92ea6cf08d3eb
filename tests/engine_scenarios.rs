//! End-to-end engine behaviour against the in-memory backend

use std::fs;
use tempfile::TempDir;
use tidemark::config::MigrationsConfig;
use tidemark::database::FailPoint;
use tidemark::executor::{TideError, TideExecutor};
use tidemark::migration::lock::MigrationLockGuard;
use tidemark::migration::migrator::BOOTSTRAP_MESSAGE;
use tidemark::migration::{
    Direction, ErrorKind, HookOutcome, MigrationError, MigrationUnit, Migrator, UnitRegistry,
};
use tidemark::MemoryDatabase;

const DB: &str = "shop";
const LEDGER: &str = "tidemark_migrations";

struct Fixture {
    dir: TempDir,
    db: MemoryDatabase,
    migrator: Migrator<MemoryDatabase>,
}

impl Fixture {
    fn new(units: &[&str]) -> Self {
        Self::with_config(units, |_| {})
    }

    fn with_config(units: &[&str], adjust: impl FnOnce(&mut MigrationsConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        for name in units {
            write_unit(&dir, name);
        }
        let mut config = MigrationsConfig::with_directory(dir.path());
        adjust(&mut config);

        let db = MemoryDatabase::new(DB);
        let migrator = Migrator::new(config, db.clone()).unwrap();
        Self { dir, db, migrator }
    }

    fn ledger(&self) -> Vec<String> {
        self.db.state().ledger_names(DB, LEDGER)
    }

    fn statements(&self) -> Vec<String> {
        self.db.state().statements.clone()
    }

    fn count_events(&self, event: &str) -> usize {
        self.db.state().events.iter().filter(|e| e.as_str() == event).count()
    }
}

fn write_unit(dir: &TempDir, name: &str) {
    fs::write(
        dir.path().join(format!("{name}.sql")),
        format!("-- migrate:up\nCREATE TABLE t_{name} (id INT);\n\n-- migrate:down\nDROP TABLE t_{name};\n"),
    )
    .unwrap();
}

fn create_sql(name: &str) -> String {
    format!("CREATE TABLE t_{name} (id INT);")
}

fn drop_sql(name: &str) -> String {
    format!("DROP TABLE t_{name};")
}

#[test]
fn test_create_then_exists() {
    let fx = Fixture::new(&[]);
    let unit = fx.migrator.create("create_users", Some("1700000000")).unwrap();

    assert_eq!(unit.name, "1700000000_create_users");
    assert!(unit.path.is_file());
    assert!(fx.migrator.store().exists("1700000000_create_users").unwrap());
}

#[test]
fn test_list_is_ascending_by_timestamp() {
    let fx = Fixture::new(&["900_z", "10000_a", "50_m", "1000_b"]);
    let names: Vec<_> = fx.migrator.store().list().unwrap().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["50_m", "900_z", "1000_b", "10000_a"]);
}

#[test]
fn test_sync_dry_run_is_repeatable_and_changes_nothing() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);

    let first = fx.migrator.sync(true, None).unwrap();
    let second = fx.migrator.sync(true, None).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        first.lines(),
        &[
            BOOTSTRAP_MESSAGE.to_string(),
            "Current version is: -- none --".to_string(),
            "Run migration 1000_a (up)".to_string(),
            "Run migration 2000_b (up)".to_string(),
        ]
    );
    assert!(fx.db.state().databases.is_empty());
    assert!(fx.statements().is_empty());
    assert!(fx.db.state().locks.is_empty());
}

#[test]
fn test_up_applies_one_unit() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    let log = fx.migrator.up(false, None).unwrap();

    assert!(log.lines().contains(&"Run migration 1000_a (up)".to_string()));
    assert_eq!(fx.ledger(), vec!["1000_a"]);
    assert_eq!(fx.statements(), vec![create_sql("1000_a")]);
}

#[test]
fn test_up_then_down_restores_ledger() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.up(false, None).unwrap();
    let before = fx.ledger();

    fx.migrator.up(false, None).unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);

    fx.migrator.down(false, None).unwrap();
    assert_eq!(fx.ledger(), before);
    assert_eq!(fx.statements().last(), Some(&drop_sql("2000_b")));
}

#[test]
fn test_up_when_current_is_already_current() {
    let mut fx = Fixture::new(&["1000_a"]);
    fx.migrator.sync(false, None).unwrap();

    let err = fx.migrator.up(false, None).unwrap_err();
    assert!(matches!(err, MigrationError::AlreadyCurrent { ref current } if current == "1000_a"));
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert_eq!(fx.ledger(), vec!["1000_a"]);

    assert!(matches!(fx.migrator.sync(false, None), Err(MigrationError::AlreadyCurrent { .. })));
}

#[test]
fn test_down_on_empty_ledger() {
    let mut fx = Fixture::new(&["1000_a"]);
    fx.migrator.reset(false).unwrap();
    let events = fx.db.state().events.len();

    let err = fx.migrator.down(false, None).unwrap_err();
    assert!(matches!(err, MigrationError::NoLowerLevel));
    assert_eq!(fx.count_events("drop database shop"), 1);
    assert!(fx.db.state().events[events..].iter().all(|e| !e.starts_with("drop")));
}

#[test]
fn test_down_on_uninitialized_database_does_not_bootstrap() {
    let mut fx = Fixture::new(&["1000_a"]);
    assert!(matches!(fx.migrator.down(false, None), Err(MigrationError::NoLowerLevel)));
    assert!(fx.db.state().databases.is_empty());
}

#[test]
fn test_sync_three_then_down_one() {
    let mut fx = Fixture::new(&["1000_a", "2000_b", "3000_c"]);
    fx.migrator.sync(false, None).unwrap();

    assert_eq!(
        fx.statements(),
        vec![create_sql("1000_a"), create_sql("2000_b"), create_sql("3000_c")]
    );
    let ledger = fx.migrator.ledger().clone();
    let current = ledger
        .most_recent(fx.migrator.database_mut())
        .unwrap()
        .map(|entry| entry.name);
    assert_eq!(current.as_deref(), Some("3000_c"));

    fx.migrator.down(false, None).unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
    assert_eq!(fx.statements().last(), Some(&drop_sql("3000_c")));
    assert_eq!(fx.statements().len(), 4);
}

#[test]
fn test_remove_applied_unit() {
    let mut fx = Fixture::new(&["1000_a", "2000_b", "3000_c"]);
    fx.migrator.sync(false, None).unwrap();

    fx.migrator.remove("2000_b").unwrap();

    let names: Vec<_> = fx.migrator.store().list().unwrap().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["1000_a", "3000_c"]);
    assert_eq!(fx.ledger(), vec!["1000_a", "3000_c"]);
    assert!(!fx.dir.path().join("2000_b.sql").exists());
    assert_eq!(fx.migrator.status().unwrap().current.as_deref(), Some("3000_c"));

    assert!(matches!(fx.migrator.remove("2000_b"), Err(MigrationError::NotFound(_))));
}

#[test]
fn test_failing_unit_keeps_earlier_units() {
    let mut fx = Fixture::new(&["1000_a", "2000_b", "3000_c"]);
    fx.db.fail_statements_containing("t_2000_b");

    let err = fx.migrator.sync(false, None).unwrap_err();
    assert!(matches!(
        err,
        MigrationError::ExecutionFailed { ref name, hook: "up", .. } if name == "2000_b"
    ));
    assert_eq!(err.kind(), ErrorKind::UnitExecution);

    assert_eq!(fx.ledger(), vec!["1000_a"]);
    assert_eq!(fx.statements(), vec![create_sql("1000_a")]);

    // Once fixed, the run resumes from the failed unit
    fx.db.clear_failures();
    fx.migrator.sync(false, None).unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b", "3000_c"]);
}

#[test]
fn test_ledger_write_failure_rolls_back_unit() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.up(false, None).unwrap();
    fx.db.fail_at(FailPoint::InsertLedgerRow);

    let err = fx.migrator.up(false, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);
    assert_eq!(fx.ledger(), vec!["1000_a"]);
    assert_eq!(fx.statements(), vec![create_sql("1000_a")]);
}

#[test]
fn test_non_transactional_run_keeps_partial_work() {
    let mut fx = Fixture::with_config(&["1000_a"], |config| config.transactional = false);
    fx.migrator.reset(false).unwrap();
    fx.db.fail_at(FailPoint::InsertLedgerRow);

    assert!(fx.migrator.up(false, None).is_err());
    assert!(fx.ledger().is_empty());
    assert_eq!(fx.statements(), vec![create_sql("1000_a")]);
}

#[test]
fn test_referential_integrity_restored_after_failure() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.db.fail_statements_containing("t_2000_b");

    assert!(fx.migrator.sync(false, None).is_err());

    let state = fx.db.state();
    assert!(state.referential_integrity);
    let toggles: Vec<_> = state
        .events
        .iter()
        .filter(|e| e.starts_with("referential integrity"))
        .cloned()
        .collect();
    assert_eq!(toggles, vec!["referential integrity off", "referential integrity on"]);
}

#[test]
fn test_integrity_suspend_failure_runs_nothing() {
    let mut fx = Fixture::new(&["1000_a"]);
    fx.db.fail_at(FailPoint::SuspendIntegrity);

    assert!(fx.migrator.sync(false, None).is_err());
    assert!(fx.statements().is_empty());
    assert!(fx.ledger().is_empty());
}

#[test]
fn test_bootstrap_runs_once() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);

    let log = fx.migrator.up(false, None).unwrap();
    assert_eq!(log.lines()[0], BOOTSTRAP_MESSAGE);
    assert_eq!(fx.count_events("drop database shop"), 1);
    assert_eq!(fx.count_events("create table tidemark_migrations"), 1);

    let log = fx.migrator.up(false, None).unwrap();
    assert!(!log.lines().contains(&BOOTSTRAP_MESSAGE.to_string()));
    assert_eq!(log.lines()[0], "Current version is: 1000_a");
    assert_eq!(fx.count_events("drop database shop"), 1);
}

#[test]
fn test_bootstrap_failure_is_reported() {
    let mut fx = Fixture::new(&["1000_a"]);
    fx.db.fail_at(FailPoint::CreateLedgerTable);

    let err = fx.migrator.sync(false, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaBootstrap);
    assert!(fx.statements().is_empty());
}

#[test]
fn test_reset_empties_ledger_without_reapplying() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();

    let dry = fx.migrator.reset(true).unwrap();
    assert_eq!(
        dry.lines(),
        &[
            "Current version is: 2000_b".to_string(),
            "Rebuild schema (reset)".to_string(),
        ]
    );
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);

    fx.migrator.reset(false).unwrap();
    assert!(fx.ledger().is_empty());
    assert_eq!(fx.db.state().ledger(DB, LEDGER), Some(vec![]));
    assert_eq!(fx.statements().len(), 2);
}

#[test]
fn test_reset_dry_run_on_absent_database() {
    let mut fx = Fixture::new(&["1000_a"]);

    let dry = fx.migrator.reset(true).unwrap();
    assert_eq!(
        dry.lines(),
        &[
            BOOTSTRAP_MESSAGE.to_string(),
            "Current version is: -- none --".to_string(),
            "Rebuild schema (reset)".to_string(),
        ]
    );
    assert!(fx.db.state().databases.is_empty());
}

#[test]
fn test_reset_without_units() {
    let mut fx = Fixture::new(&[]);
    fx.migrator.reset(false).unwrap();
    assert_eq!(fx.db.state().ledger(DB, LEDGER), Some(vec![]));
}

#[test]
fn test_down_from_first_unit_rebuilds_schema() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.up(false, None).unwrap();

    let dry = fx.migrator.down(true, None).unwrap();
    assert_eq!(
        dry.lines(),
        &[
            "Current version is: 1000_a".to_string(),
            "Rebuild schema (revert 1000_a)".to_string(),
        ]
    );
    assert_eq!(fx.ledger(), vec!["1000_a"]);
    assert_eq!(fx.count_events("drop database shop"), 1);

    fx.migrator.down(false, None).unwrap();
    assert!(fx.ledger().is_empty());
    assert_eq!(fx.count_events("drop database shop"), 2);
    assert!(!fx.statements().contains(&drop_sql("1000_a")));
    assert!(fx.db.state().referential_integrity);
}

#[test]
fn test_targets() {
    let mut fx = Fixture::new(&["1000_a", "2000_b", "3000_c", "4000_d"]);

    fx.migrator.sync(false, Some("2000_b")).unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);

    let err = fx.migrator.up(false, Some("1000_a")).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidTarget { expected: "newer", .. }));

    fx.migrator.up(false, Some("4000_d")).unwrap();
    assert_eq!(fx.ledger().len(), 4);

    let err = fx.migrator.down(false, Some("4000_d")).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidTarget { expected: "older", .. }));

    fx.migrator.down(false, Some("2000_b")).unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
    let tail: Vec<_> = fx.statements().into_iter().rev().take(2).collect();
    assert_eq!(tail, vec![drop_sql("3000_c"), drop_sql("4000_d")]);

    assert!(matches!(fx.migrator.up(false, Some("9000_x")), Err(MigrationError::NotFound(_))));
    assert!(matches!(fx.migrator.up(false, Some("bogus")), Err(MigrationError::InvalidName(_))));
}

#[test]
fn test_current_level_missing_from_disk() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();
    fs::remove_file(fx.dir.path().join("2000_b.sql")).unwrap();

    let err = fx.migrator.down(false, None).unwrap_err();
    assert!(matches!(err, MigrationError::MissingUnit(ref name) if name == "2000_b"));
}

#[test]
fn test_no_units() {
    let mut fx = Fixture::new(&[]);
    for direction in [Direction::Up, Direction::Down, Direction::Sync] {
        assert!(matches!(
            fx.migrator.migrate(direction, false, None),
            Err(MigrationError::NoUnits)
        ));
    }
}

#[test]
fn test_lock_held_elsewhere() {
    let mut fx = Fixture::with_config(&["1000_a"], |config| config.lock_timeout_seconds = 0);
    let _held = MigrationLockGuard::acquire(&fx.db, LEDGER, 0).unwrap();

    assert!(matches!(fx.migrator.sync(false, None), Err(MigrationError::LockTimeout(_))));
    assert!(fx.db.state().databases.is_empty());

    // Dry runs do not lock
    assert!(fx.migrator.sync(true, None).is_ok());
}

#[test]
fn test_lock_released_after_failure() {
    let mut fx = Fixture::new(&["1000_a"]);
    fx.db.fail_statements_containing("t_1000_a");
    assert!(fx.migrator.sync(false, None).is_err());
    assert!(fx.db.state().locks.is_empty());
}

#[test]
fn test_missing_down_section_leaves_ledger() {
    let mut fx = Fixture::new(&["1000_a"]);
    fs::write(fx.dir.path().join("2000_b.sql"), "-- migrate:up\nCREATE TABLE b (id INT);\n").unwrap();
    fx.migrator.sync(false, None).unwrap();

    let log = fx.migrator.down(false, None).unwrap();
    assert!(log.lines().contains(&"Run migration 2000_b (down)".to_string()));
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
}

struct SeedUsers;

impl MigrationUnit for SeedUsers {
    fn try_up(&self, executor: &dyn TideExecutor) -> Result<HookOutcome, TideError> {
        executor.execute("INSERT INTO users (name) VALUES ('admin')", &[])?;
        Ok(HookOutcome::Applied)
    }
}

#[test]
fn test_registered_unit_overrides_script() {
    let dir = TempDir::new().unwrap();
    write_unit(&dir, "1000_a");
    write_unit(&dir, "2000_seed");

    let mut registry = UnitRegistry::new();
    registry.register("2000_seed", SeedUsers).unwrap();

    let db = MemoryDatabase::new(DB);
    let mut migrator = Migrator::new(MigrationsConfig::with_directory(dir.path()), db.clone())
        .unwrap()
        .with_registry(registry);

    migrator.sync(false, None).unwrap();
    assert_eq!(
        db.state().statements,
        vec![create_sql("1000_a"), "INSERT INTO users (name) VALUES ('admin')".to_string()]
    );

    // No down hook on the registered unit: reverting is a no-op
    migrator.down(false, None).unwrap();
    assert_eq!(db.state().ledger_names(DB, LEDGER), vec!["1000_a", "2000_seed"]);
}

#[test]
fn test_rename_applied_unit_rekeys_ledger() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();

    fx.migrator.rename("2000_b", "2500_b_renamed").unwrap();
    assert_eq!(fx.ledger(), vec!["1000_a", "2500_b_renamed"]);
    assert!(fx.dir.path().join("2500_b_renamed.sql").is_file());

    assert!(matches!(fx.migrator.up(false, None), Err(MigrationError::AlreadyCurrent { .. })));
}

#[test]
fn test_rename_ledger_failure_leaves_file() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();
    fx.db.fail_at(FailPoint::InsertLedgerRow);

    let err = fx.migrator.rename("2000_b", "2500_b").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);
    assert!(fx.dir.path().join("2000_b.sql").is_file());
    assert!(!fx.dir.path().join("2500_b.sql").exists());
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
}

#[test]
fn test_rename_file_failure_rolls_back_ledger() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();
    // A directory in the way makes the new file impossible to create
    fs::create_dir(fx.dir.path().join("2500_b.sql")).unwrap();

    assert!(fx.migrator.rename("2000_b", "2500_b").is_err());
    assert!(fx.dir.path().join("2000_b.sql").is_file());
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
    assert!(matches!(fx.migrator.up(false, None), Err(MigrationError::AlreadyCurrent { .. })));
}

#[test]
fn test_remove_ledger_failure_leaves_file() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();
    fx.db.fail_at(FailPoint::DeleteLedgerRows);

    assert!(fx.migrator.remove("2000_b").is_err());
    assert!(fx.dir.path().join("2000_b.sql").is_file());
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
}

#[test]
fn test_remove_unapplied_unit_before_bootstrap() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.remove("2000_b").unwrap();
    assert!(!fx.dir.path().join("2000_b.sql").exists());
    assert!(fx.db.state().databases.is_empty());
}

#[test]
fn test_up_to_older_target_when_up_to_date() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    fx.migrator.sync(false, None).unwrap();

    let err = fx.migrator.up(false, Some("1000_a")).unwrap_err();
    assert!(matches!(err, MigrationError::InvalidTarget { expected: "newer", .. }));
    assert_eq!(fx.ledger(), vec!["1000_a", "2000_b"]);
}

#[test]
fn test_clear_ledger_keeps_schema() {
    let mut fx = Fixture::new(&["1000_a", "2000_b"]);
    assert!(matches!(fx.migrator.clear_ledger(), Err(MigrationError::LedgerAbsent(_))));

    fx.migrator.sync(false, None).unwrap();
    assert_eq!(fx.migrator.clear_ledger().unwrap(), 2);
    assert!(fx.ledger().is_empty());
    assert_eq!(fx.count_events("drop database shop"), 1);
}

#[test]
fn test_status_reports_levels() {
    let mut fx = Fixture::new(&["1000_a", "2000_b", "3000_c"]);
    let status = fx.migrator.status().unwrap();
    assert!(!status.initialized);
    assert_eq!(status.current, None);

    fx.migrator.up(false, None).unwrap();
    let status = fx.migrator.status().unwrap();
    assert!(status.initialized);
    assert_eq!(status.current.as_deref(), Some("1000_a"));
    assert_eq!(status.newest.as_deref(), Some("3000_c"));
    assert_eq!(status.applied_count(), 1);
    assert_eq!(status.pending().count(), 2);
    assert!(!status.is_up_to_date());
}
