//! CLI error type

use tidemark::migration::MigrationError;

/// Anything a command can fail with
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CommandError {
    /// Errors caused by operator input or database state rather than a fault.
    ///
    /// These are reported as a single line, without the cause chain.
    #[must_use]
    pub fn is_operator_facing(&self) -> bool {
        match self {
            CommandError::Migration(e) => e.is_operator_facing(),
            CommandError::Config(_) => true,
            CommandError::Render(_) | CommandError::Output(_) => false,
        }
    }
}
