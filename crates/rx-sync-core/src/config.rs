//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding tracing directives (e.g. `rx_sync_core=debug`).
pub const LOG_ENV_VAR: &str = "RX_SYNC_LOG";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Synchronizer settings. Missing JSON fields fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Database schema the item table lives in
    pub schema: String,
    /// Table whose rows become display records
    pub items_table: String,
    /// Prefix of the per-subject realtime channel key
    pub channel_prefix: String,
    /// Status grouped first in the list
    pub active_status: String,
    /// Maximum medication search results
    pub search_limit: usize,
    /// Days ahead an active prescription's end date counts as expiring
    pub expiring_within_days: u32,
    /// Tracing directives used when `RX_SYNC_LOG` is unset
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            items_table: "prescription_items".to_string(),
            channel_prefix: "rx-items".to_string(),
            active_status: crate::models::ACTIVE_STATUS.to_string(),
            search_limit: 50,
            expiring_within_days: 7,
            log_filter: "rx_sync_core=info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.items_table.trim().is_empty() {
            return Err(ConfigError::Invalid("items_table must not be empty".into()));
        }
        if self.channel_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("channel_prefix must not be empty".into()));
        }
        if self.search_limit == 0 {
            return Err(ConfigError::Invalid("search_limit must be positive".into()));
        }
        Ok(())
    }

    /// Realtime channel key scoped to one subject.
    pub fn channel_key(&self, subject_id: &str) -> String {
        format!("{}:{}", self.channel_prefix, subject_id)
    }
}
