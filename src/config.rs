//! Application configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (`config/default.toml` unless `--config` names another)
//! 2. environment variables prefixed with `TOPTICA_DAQ_`, nested with `__`
//!
//! ```text
//! TOPTICA_DAQ_LOG_LEVEL=debug
//! TOPTICA_DAQ_LASER__COM_PORT=/dev/ttyUSB1
//! TOPTICA_DAQ_LOGIC__QUERY_INTERVAL=250
//! ```
//!
//! The `[laser]` and `[microwave]` tables are passed unparsed to the driver
//! registry; each driver factory validates its own table.
//!
//! # Example
//! ```no_run
//! use toptica_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/default.toml")?;
//! settings.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use daq_laser_logic::LogicSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "TOPTICA_DAQ_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Laser driver table; `model` selects the driver
    #[serde(default)]
    pub laser: toml::Table,
    /// Poll loop settings
    #[serde(default)]
    pub logic: LogicSettings,
    /// Optional microwave source driver table
    #[serde(default)]
    pub microwave: Option<toml::Table>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            laser: toml::Table::new(),
            logic: LogicSettings::default(),
            microwave: None,
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path, then apply environment overrides.
    ///
    /// A missing file contributes nothing; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !VALID_FORMATS.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                VALID_FORMATS.join(", ")
            ));
        }

        self.logic
            .validate()
            .map_err(|e| format!("Invalid [logic] section: {e}"))?;

        if let Some(model) = self.laser.get("model") {
            if !model.is_str() {
                return Err("laser.model must be a string".to_string());
            }
        }

        Ok(())
    }

    /// Replace both driver tables with the mock drivers.
    pub fn use_mock_devices(&mut self) {
        let mut laser = toml::Table::new();
        laser.insert("model".into(), "mock".into());
        self.laser = laser;

        let mut microwave = toml::Table::new();
        microwave.insert("model".into(), "mock".into());
        self.microwave = Some(microwave);
    }

    /// The laser table as handed to the driver registry.
    pub fn laser_config(&self) -> toml::Value {
        toml::Value::Table(self.laser.clone())
    }

    /// The microwave table, if one is configured.
    pub fn microwave_config(&self) -> Option<toml::Value> {
        self.microwave.clone().map(toml::Value::Table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.logic.query_interval, 100);
        assert!(settings.microwave.is_none());
    }

    #[test]
    fn invalid_log_level() {
        let settings = Settings {
            log_level: "verbose".to_string(),
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.contains("log_level"));
    }

    #[test]
    fn invalid_log_format() {
        let settings = Settings {
            log_format: "xml".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut settings = Settings::default();
        settings.logic.query_interval = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.contains("query_interval"));
    }

    #[test]
    fn mock_devices_replace_driver_tables() {
        let mut settings = Settings::default();
        settings.laser.insert("com_port".into(), "COM3".into());
        settings.use_mock_devices();

        let laser = settings.laser_config();
        assert_eq!(laser.get("model").and_then(|v| v.as_str()), Some("mock"));
        assert!(laser.get("com_port").is_none());
        assert!(settings.microwave_config().is_some());
    }
}
