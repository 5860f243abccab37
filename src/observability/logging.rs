//! # Logging
//!
//! tracing subscriber setup. `RUST_LOG` overrides the default filter;
//! `LOG_FORMAT=text` switches from JSON lines to human-readable output.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "configsync_controller=info";

/// Install the global tracing subscriber
///
/// Returns an error if a subscriber was already installed.
pub fn init_tracing(log_format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let result = if log_format.eq_ignore_ascii_case("text") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}
