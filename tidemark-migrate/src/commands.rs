//! Command handlers

use crate::CommandError;
use chrono::DateTime;
use colored::Colorize;
use std::io::Write;
use tidemark::database::Database;
use tidemark::migration::migrator::NO_VERSION;
use tidemark::migration::{Direction, Migrator};
use tidemark::MigrateConfig;

/// `create <name> [timestamp]`
///
/// # Errors
///
/// Validation errors from the unit store, or output failures.
pub fn create<D: Database>(
    migrator: &Migrator<D>,
    name: &str,
    timestamp: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let unit = migrator.create(name, timestamp)?;
    writeln!(out, "{} {}", "Created migration".green(), unit.path.display())?;
    writeln!(out, "   Fill in the migrate:up and migrate:down sections")?;
    Ok(())
}

/// `up`, `down`, `sync` and `reset`: run the engine and print its log.
///
/// # Errors
///
/// Any engine error, or output failures.
pub fn migrate<D: Database>(
    migrator: &mut Migrator<D>,
    direction: Direction,
    dry_run: bool,
    target: Option<&str>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let log = migrator.migrate(direction, dry_run, target)?;
    for line in log.lines() {
        writeln!(out, "{line}")?;
    }
    if dry_run {
        writeln!(out, "{}", "Dry run: nothing was changed".yellow())?;
    } else {
        writeln!(out, "{}", format!("Migrated ({direction})").green())?;
    }
    Ok(())
}

/// `status`: every unit with its applied flag.
///
/// # Errors
///
/// Directory or database failures, or output failures.
pub fn status<D: Database>(
    migrator: &mut Migrator<D>,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let status = migrator.status()?;

    writeln!(out, "Migration status for {}", migrator.database().target_name().bold())?;
    if !status.initialized {
        writeln!(out, "{}", "Database or ledger table does not exist yet".yellow())?;
    }

    if status.units.is_empty() {
        writeln!(out, "  No migrations in {}", migrator.store().directory().display())?;
    }
    for unit in &status.units {
        let created = DateTime::from_timestamp(unit.timestamp, 0)
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        let marker = if unit.applied {
            "applied".green()
        } else {
            "pending".yellow()
        };
        writeln!(out, "  [{marker}] {}  ({created})", unit.name)?;
    }

    writeln!(out)?;
    writeln!(out, "Current version: {}", status.current.as_deref().unwrap_or(NO_VERSION))?;
    writeln!(out, "Newest migration: {}", status.newest.as_deref().unwrap_or(NO_VERSION))?;
    writeln!(
        out,
        "Summary: {} applied, {} pending",
        status.applied_count(),
        status.pending().count()
    )?;
    Ok(())
}

/// `remove <name>`: delete the file and its ledger row.
///
/// # Errors
///
/// `NotFound`, `InvalidName`, database failures, or output failures.
pub fn remove<D: Database>(
    migrator: &mut Migrator<D>,
    name: &str,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    migrator.remove(name)?;
    writeln!(out, "{} {}", "Removed migration".green(), name)?;
    Ok(())
}

/// `rename <name> <new-name>`
///
/// # Errors
///
/// Validation errors, database failures, or output failures.
pub fn rename<D: Database>(
    migrator: &mut Migrator<D>,
    name: &str,
    new_name: &str,
    out: &mut dyn Write,
) -> Result<(), CommandError> {
    let unit = migrator.rename(name, new_name)?;
    writeln!(out, "{} {} -> {}", "Renamed migration".green(), name, unit.name)?;
    Ok(())
}

/// `config`: the effective configuration as TOML, password masked.
///
/// # Errors
///
/// Serialization or output failures.
pub fn show_config(config: &MigrateConfig, out: &mut dyn Write) -> Result<(), CommandError> {
    let rendered = toml::to_string_pretty(&config.redacted())?;
    write!(out, "{rendered}")?;
    Ok(())
}
