//! Configuration management for AmbientBrightness
//!
//! Handles module locations for the brightness backends and logging settings.
//! Configuration lives in TOML files; a user file is layered over the system
//! file, and anything missing falls back to built-in defaults.

mod logging;

pub use logging::LoggingConfig;

use ambient_hal::{AmbientLightConfig, KeyboardConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Standard configuration paths
pub const CONFIG_DIR: &str = "/Library/Application Support/AmbientBrightness";
pub const USER_CONFIG_DIR: &str = ".config/ambient-brightness";
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "AMBIENT_BRIGHTNESS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmbientConfig {
    #[serde(default)]
    pub ambient: AmbientLightConfig,

    #[serde(default)]
    pub keyboard: KeyboardConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AmbientConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&explicit));
        }

        let system_config = Path::new(CONFIG_DIR).join(CONFIG_FILE);
        let user_config = user_config_path();
        Self::load_layered(&system_config, user_config.as_deref())
    }

    /// Load the system file with the user file layered on top.
    ///
    /// Either file may be missing; with neither present the defaults are used.
    pub fn load_layered(system: &Path, user: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged: Option<toml::Value> = None;

        for path in std::iter::once(system).chain(user) {
            if !path.exists() {
                continue;
            }
            let overlay: toml::Value = toml::from_str(&std::fs::read_to_string(path)?)?;
            tracing::debug!("Loaded configuration layer {}", path.display());
            match merged.as_mut() {
                Some(base) => merge_toml(base, overlay),
                None => merged = Some(overlay),
            }
        }

        let Some(merged) = merged else {
            tracing::warn!("No configuration file found, using defaults");
            return Ok(Self::default());
        };

        let config: Self = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check module paths and logging settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        let modules = [
            ("ambient.sensor_module", &self.ambient.sensor_module),
            ("ambient.input_module", &self.ambient.input_module),
            ("keyboard.backlight_module", &self.keyboard.backlight_module),
            ("keyboard.runtime_module", &self.keyboard.runtime_module),
        ];
        for (key, path) in modules {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be an absolute path, got {}",
                    key,
                    path.display()
                )));
            }
        }

        self.logging.validate()
    }
}

/// User configuration file under `$HOME`
pub fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(USER_CONFIG_DIR).join(CONFIG_FILE))
}

/// Helper function to merge TOML values
pub fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(&key) {
                    merge_toml(base_value, value);
                } else {
                    base_table.insert(key, value);
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
