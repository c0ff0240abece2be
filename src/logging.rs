//! Tracing subscriber setup for the `daemon-chat` binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the embedding application.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "warn";

/// Builds the filter from `directives`, falling back to [`DEFAULT_FILTER`]
/// when they are absent or invalid.
pub fn env_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs a stderr fmt subscriber. Safe to call more than once; later
/// calls leave the first subscriber in place and return `false`.
pub fn init(directives: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(directives))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
