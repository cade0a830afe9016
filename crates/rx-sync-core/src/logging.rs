//! Tracing subscriber initialization.

use tracing_subscriber::EnvFilter;

use crate::config::{SyncConfig, LOG_ENV_VAR};

/// Build the filter: `RX_SYNC_LOG` if set and valid, else the configured
/// directives, else `info`.
pub fn build_env_filter(config: &SyncConfig) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV_VAR) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber. Returns false if one was already set.
pub fn init_tracing(config: &SyncConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(true)
        .try_init()
        .is_ok()
}
