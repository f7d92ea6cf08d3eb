//! Span helpers used when the `tracing` feature is enabled.
//!
//! Logging itself always goes through the `log` facade; spans add structure for
//! subscribers that understand them.

#[cfg(feature = "tracing")]
pub(crate) mod tracing_helpers {
    use tracing::{info_span, Span};

    pub(crate) fn connect_span() -> Span {
        info_span!("tidemark.connect")
    }

    pub(crate) fn execute_query_span(query: &str) -> Span {
        // Scripts can be large; the first line is enough to identify them
        let head = query.trim_start().lines().next().unwrap_or_default();
        info_span!("tidemark.execute", statement = head)
    }

    pub(crate) fn migrate_span(direction: &str, dry_run: bool) -> Span {
        info_span!("tidemark.migrate", direction, dry_run)
    }

    pub(crate) fn hook_span(unit: &str, hook: &str) -> Span {
        info_span!("tidemark.hook", unit, hook)
    }

    pub(crate) fn bootstrap_span(database: &str) -> Span {
        info_span!("tidemark.bootstrap", database)
    }
}
