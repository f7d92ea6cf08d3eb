//! Explicit registry of code-defined migration units

use crate::migration::file::{is_valid_name, UnitDescriptor};
use crate::migration::{MigrationError, MigrationUnit, SqlScriptUnit};
use std::collections::HashMap;
use std::sync::Arc;

/// Units implemented in code, keyed by full unit name.
///
/// The registry is owned by a `Migrator`; nothing is registered globally. A unit on
/// disk whose name is registered here runs the registered implementation instead
/// of its script. The file still has to exist: the directory decides which units
/// exist and in what order.
#[derive(Default, Clone)]
pub struct UnitRegistry {
    units: HashMap<String, Arc<dyn MigrationUnit>>,
}

impl UnitRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unit` under the full unit name `name`.
    ///
    /// # Errors
    ///
    /// `InvalidName` if `name` is malformed, `DuplicateUnit` if it is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        unit: impl MigrationUnit + 'static,
    ) -> Result<(), MigrationError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(MigrationError::InvalidName(name));
        }
        if self.units.contains_key(&name) {
            return Err(MigrationError::DuplicateUnit(name));
        }
        self.units.insert(name, Arc::new(unit));
        Ok(())
    }

    /// Whether `name` has a code-defined unit
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Implementation to run for `unit`: the registered one, otherwise its script.
    ///
    /// # Errors
    ///
    /// `Io` if the script has to be read and cannot be.
    pub fn resolve(&self, unit: &UnitDescriptor) -> Result<Arc<dyn MigrationUnit>, MigrationError> {
        if let Some(registered) = self.units.get(&unit.name) {
            return Ok(Arc::clone(registered));
        }
        Ok(Arc::new(SqlScriptUnit::load(&unit.path)?))
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry").field("units", &self.names()).finish()
    }
}
