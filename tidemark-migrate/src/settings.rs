//! Configuration resolution: file and environment, then command-line overrides

use crate::CommandError;
use std::path::PathBuf;
use tidemark::MigrateConfig;

/// Values given on the command line, each overriding file and environment settings
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Explicit configuration file; required to exist when set
    pub config_path: Option<PathBuf>,
    pub migrations_dir: Option<PathBuf>,
    pub ledger_table: Option<String>,
    pub database: Option<String>,
}

impl Overrides {
    /// Apply the overrides on top of `config`.
    #[must_use]
    pub fn apply(&self, mut config: MigrateConfig) -> MigrateConfig {
        if let Some(dir) = &self.migrations_dir {
            config.migrations.directory.clone_from(dir);
        }
        if let Some(table) = &self.ledger_table {
            config.migrations.ledger_table.clone_from(table);
        }
        if let Some(database) = &self.database {
            config.database.database.clone_from(database);
        }
        config
    }

    /// Load the configuration and apply the overrides.
    ///
    /// # Errors
    ///
    /// `CommandError::Config` if the configuration cannot be loaded.
    pub fn resolve(&self) -> Result<MigrateConfig, CommandError> {
        let config = MigrateConfig::load_from(self.config_path.as_deref())
            .map_err(|e| CommandError::Config(e.to_string()))?;
        let config = self.apply(config);
        log::debug!(
            "using database {} with migrations in {}",
            config.database.database,
            config.migrations.directory.display()
        );
        Ok(config)
    }
}
