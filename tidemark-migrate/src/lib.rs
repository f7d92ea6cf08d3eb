//! Tidemark Migration Library
//!
//! Command handlers and configuration resolution behind the `tidemark-migrate`
//! binary. Handlers take any `Database` backend and write to any `io::Write`, so
//! they can be driven against `MemoryDatabase` in tests.

pub mod commands;
pub mod error;
pub mod settings;

pub use error::CommandError;
pub use settings::Overrides;
