//! Migration unit discovery and file management

use crate::migration::MigrationError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

static UNIT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)_[-_a-z0-9]+$").expect("unit name pattern"));
static SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-_a-z0-9]+$").expect("slug pattern"));
static TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("timestamp pattern"));

/// A migration unit found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    /// Ordering key, equal to the numeric prefix of `name`
    pub timestamp: i64,

    /// Full unit name: `<timestamp>_<slug>`
    pub name: String,

    /// Path to the unit file
    pub path: PathBuf,
}

impl UnitDescriptor {
    /// Name without the timestamp prefix
    #[must_use]
    pub fn slug(&self) -> &str {
        self.name
            .split_once('_')
            .map_or(self.name.as_str(), |(_, slug)| slug)
    }
}

/// Return true if `name` is a valid full unit name (`<digits>_<slug>`).
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    UNIT_NAME.is_match(name)
}

/// Parse the timestamp prefix out of a full unit name.
///
/// # Errors
///
/// `InvalidName` if the name is malformed, `InvalidTimestamp` if the prefix does not
/// fit in an `i64`.
pub fn parse_name(name: &str) -> Result<i64, MigrationError> {
    let caps = UNIT_NAME
        .captures(name)
        .ok_or_else(|| MigrationError::InvalidName(name.to_string()))?;
    let prefix = &caps[1];
    prefix
        .parse::<i64>()
        .map_err(|_| MigrationError::InvalidTimestamp(prefix.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<i64, MigrationError> {
    if !TIMESTAMP.is_match(raw) {
        return Err(MigrationError::InvalidTimestamp(raw.to_string()));
    }
    raw.parse::<i64>()
        .map_err(|_| MigrationError::InvalidTimestamp(raw.to_string()))
}

/// Directory of migration units, one file per unit named `<timestamp>_<slug>.<ext>`
#[derive(Debug, Clone)]
pub struct UnitStore {
    directory: PathBuf,
    extension: String,
}

impl UnitStore {
    /// Open a store over an existing directory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDirectory` if `directory` is missing or not a directory.
    pub fn open(
        directory: impl AsRef<Path>,
        extension: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(MigrationError::InvalidDirectory(directory));
        }
        let extension = extension.into().trim_start_matches('.').to_string();
        Ok(Self { directory, extension })
    }

    /// Directory this store scans
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Unit file extension, without the dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", name, self.extension))
    }

    /// Scan the directory and return all units, sorted by timestamp then name.
    ///
    /// Files with other extensions and subdirectories are ignored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for a unit file whose name does not match the pattern,
    /// and `Io` if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<UnitDescriptor>, MigrationError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|e| MigrationError::io(&self.directory, e))?;

        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::io(&self.directory, e))?;
            let path = entry.path();

            let extension = path.extension().and_then(|s| s.to_str());
            if !path.is_file() || extension != Some(self.extension.as_str()) {
                continue;
            }

            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| MigrationError::InvalidName(path.display().to_string()))?
                .to_string();
            let timestamp = parse_name(&name)?;

            units.push(UnitDescriptor { timestamp, name, path });
        }

        // Directory order is arbitrary; ties on timestamp fall back to the name
        units.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
        Ok(units)
    }

    /// Return true if a unit with this full name exists on disk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `name` is malformed.
    pub fn exists(&self, name: &str) -> Result<bool, MigrationError> {
        if !is_valid_name(name) {
            return Err(MigrationError::InvalidName(name.to_string()));
        }
        Ok(self.path_for(name).is_file())
    }

    /// Look up a unit by full name.
    ///
    /// # Errors
    ///
    /// `InvalidName` for malformed names, `NotFound` if no such file exists.
    pub fn get(&self, name: &str) -> Result<UnitDescriptor, MigrationError> {
        if !self.exists(name)? {
            return Err(MigrationError::NotFound(name.to_string()));
        }
        Ok(UnitDescriptor {
            timestamp: parse_name(name)?,
            name: name.to_string(),
            path: self.path_for(name),
        })
    }

    /// Create a new unit file from the template.
    ///
    /// `timestamp` defaults to the current Unix time.
    ///
    /// # Errors
    ///
    /// - `InvalidName` if `slug` contains characters outside `-_a-z0-9`
    /// - `InvalidTimestamp` if `timestamp` is not all digits
    /// - `DuplicateUnit` if the file already exists
    /// - `TimestampCollision` if another unit already uses the timestamp
    pub fn create(
        &self,
        slug: &str,
        timestamp: Option<&str>,
    ) -> Result<UnitDescriptor, MigrationError> {
        if !SLUG.is_match(slug) {
            return Err(MigrationError::InvalidName(slug.to_string()));
        }
        let timestamp = match timestamp {
            Some(raw) => parse_timestamp(raw)?,
            None => Utc::now().timestamp(),
        };

        let name = format!("{timestamp}_{slug}");
        let path = self.path_for(&name);
        if path.is_file() {
            return Err(MigrationError::DuplicateUnit(name));
        }
        self.check_collision(&name, timestamp, None)?;

        write_new(&path, &template(&name, timestamp)).map_err(|e| match e.kind() {
            IoErrorKind::AlreadyExists => MigrationError::DuplicateUnit(name.clone()),
            _ => MigrationError::io(&path, e),
        })?;
        log::info!("created migration {}", path.display());

        Ok(UnitDescriptor { timestamp, name, path })
    }

    /// Delete a unit file.
    ///
    /// Ledger cleanup is the engine's job; see `Migrator::remove`.
    ///
    /// # Errors
    ///
    /// `InvalidName` for malformed names, `NotFound` if the file does not exist.
    pub fn remove(&self, name: &str) -> Result<(), MigrationError> {
        let unit = self.get(name)?;
        fs::remove_file(&unit.path).map_err(|e| MigrationError::io(&unit.path, e))?;
        log::info!("removed migration {}", unit.path.display());
        Ok(())
    }

    /// Move a unit file to a new full name, rewriting its header.
    ///
    /// Renaming a unit to itself is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` if `name` is missing, `InvalidName` if `new_name` is malformed,
    /// `DuplicateUnit` if `new_name` exists, `TimestampCollision` if another unit
    /// already uses the new timestamp.
    pub fn rename(&self, name: &str, new_name: &str) -> Result<UnitDescriptor, MigrationError> {
        let unit = self.get(name)?;
        if !is_valid_name(new_name) {
            return Err(MigrationError::InvalidName(new_name.to_string()));
        }
        if name == new_name {
            return Ok(unit);
        }
        if self.exists(new_name)? {
            return Err(MigrationError::DuplicateUnit(new_name.to_string()));
        }
        let timestamp = parse_name(new_name)?;
        self.check_collision(new_name, timestamp, Some(name))?;

        let content =
            fs::read_to_string(&unit.path).map_err(|e| MigrationError::io(&unit.path, e))?;
        let content = content.replacen(
            &format!("-- Migration: {name}"),
            &format!("-- Migration: {new_name}"),
            1,
        );

        let new_path = self.path_for(new_name);
        write_new(&new_path, &content).map_err(|e| MigrationError::io(&new_path, e))?;
        fs::remove_file(&unit.path).map_err(|e| MigrationError::io(&unit.path, e))?;
        log::info!("renamed migration {} to {}", name, new_name);

        Ok(UnitDescriptor {
            timestamp,
            name: new_name.to_string(),
            path: new_path,
        })
    }

    fn check_collision(
        &self,
        name: &str,
        timestamp: i64,
        ignore: Option<&str>,
    ) -> Result<(), MigrationError> {
        let clash = self
            .list()?
            .into_iter()
            .find(|unit| unit.timestamp == timestamp && Some(unit.name.as_str()) != ignore);
        match clash {
            Some(existing) => Err(MigrationError::TimestampCollision {
                name: name.to_string(),
                timestamp,
                existing: existing.name,
            }),
            None => Ok(()),
        }
    }
}

fn write_new(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(content.as_bytes())
}

fn template(name: &str, timestamp: i64) -> String {
    let created = DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    format!(
        "-- Migration: {name}\n\
         -- Created: {}\n\
         --\n\
         -- Statements below `migrate:up` run when migrating up, those below\n\
         -- `migrate:down` when reverting. Remove a marker to leave that direction\n\
         -- unimplemented.\n\
         \n\
         -- migrate:up\n\
         \n\
         \n\
         -- migrate:down\n\
         \n",
        created.to_rfc2822()
    )
}
