//! Configuration loading.
//!
//! Settings come from an optional TOML file (`config/tidemark.toml` unless a path is
//! given) layered under environment variables prefixed with `TIDEMARK`, using `__` as
//! the nesting separator:
//!
//! ```text
//! TIDEMARK__DATABASE__HOST=db.internal
//! TIDEMARK__MIGRATIONS__DIRECTORY=./migrations
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/tidemark.toml";

/// Connection descriptor for the database being migrated.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Database the migrations target. Dropped and recreated by schema bootstrap.
    #[serde(default = "default_database")]
    pub database: String,
    /// Database used while no target database is selected (bootstrap, locking).
    #[serde(default = "default_maintenance_database")]
    pub maintenance_database: String,
}

/// Where units live and how the ledger is kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MigrationsConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,
    /// File extension of unit files, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    /// Run each unit and its ledger write inside one transaction.
    #[serde(default = "default_transactional")]
    pub transactional: bool,
}

/// Complete configuration for a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MigrateConfig {
    #[serde(default)]
    pub database: ConnectionConfig,
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "tidemark_dev".to_string()
}

fn default_maintenance_database() -> String {
    "postgres".to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_ledger_table() -> String {
    "tidemark_migrations".to_string()
}

fn default_extension() -> String {
    "sql".to_string()
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

fn default_transactional() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            maintenance_database: default_maintenance_database(),
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            ledger_table: default_ledger_table(),
            extension: default_extension(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            transactional: default_transactional(),
        }
    }
}

impl MigrationsConfig {
    /// Configuration pointing at `directory` with every other setting defaulted.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

impl MigrateConfig {
    /// Load from `config/tidemark.toml` (optional), falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from the given file (required when given), layered under env vars.
    ///
    /// Without an explicit path the default file is optional; if it exists but cannot
    /// be parsed, a warning is logged and only the environment is used.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let builder = Config::builder()
            .add_source(file_source)
            .add_source(Environment::with_prefix("TIDEMARK").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) if path.is_some() => return Err(err),
            Err(err) => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    log::warn!(
                        "failed to load {}, falling back to environment: {}",
                        DEFAULT_CONFIG_PATH,
                        err
                    );
                }
                Config::builder()
                    .add_source(Environment::with_prefix("TIDEMARK").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<MigrateConfig>()
    }

    /// Copy of this configuration with the password masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.database.password.is_empty() {
            copy.database.password = "********".to_string();
        }
        copy
    }
}
