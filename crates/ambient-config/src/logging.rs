//! Logging configuration

use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Log filter settings, in `tracing-subscriber` env-filter syntax
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.filter must not be empty".into()));
        }
        Ok(())
    }
}
