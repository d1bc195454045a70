// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the thermostat daemon
//!
//! This module provides functionality for loading, validating, and saving
//! the thermostat configuration. The configuration is backed by a YAML file
//! and validated against an embedded JSON schema, then checked against the
//! rules a schema cannot express (unique sensor ids and aliases, band bounds,
//! exclusive actuator ownership).
//!
//! ## Configuration Structure
//!
//! - `sensors`: one entry per sensor/actuator pair, see [`SensorConfig`]
//! - `control`: loop timing and hardware backend, see [`ControlConfig`]
//! - `visualization`: the read-only status API server
//! - `influx`: the optional time-series metrics sink
//!
//! ## Usage
//!
//! ```no_run
//! use chamber_thermostat::config::Config;
//!
//! let config = Config::from_file("config.yaml").unwrap();
//! for sensor in &config.sensors {
//!     println!("{} keeps {} between {} and {}", sensor.id, sensor.alias,
//!              sensor.low_temp, sensor.high_temp);
//! }
//! ```

pub mod control;
pub mod influx;
pub mod thermostat;
pub mod utils;
pub mod visualization;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use control::{ControlConfig, HardwareConfig, HardwareKind};
pub use influx::InfluxConfig;
pub use thermostat::{ActuatorConfig, SensorConfig};
pub use utils::{
    is_valid_ip_address, output_config_schema, validate_sensors, validate_specific_rules,
};
pub use visualization::VisualizationConfig;

/// JSON schema every configuration file is validated against before deserialization
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure for the thermostat daemon.
///
/// Every section except `sensors` falls back to its defaults when omitted, so
/// a minimal file only lists the sensors to regulate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Sensor/actuator pairs, one control loop each
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,

    /// Control loop timing and hardware backend selection
    #[serde(default)]
    pub control: ControlConfig,

    /// Status API server settings
    #[serde(default)]
    pub visualization: VisualizationConfig,

    /// Metrics sink settings
    #[serde(default)]
    pub influx: InfluxConfig,
}

/// Source of truth for the thermostat configuration.
///
/// The supervisor asks its source for a fresh configuration at startup and on
/// every reload request. Implementations must reject configurations that
/// violate id/alias uniqueness.
pub trait ConfigSource: Send + Sync {
    /// Load and validate the configuration stored at `path`
    fn load(&self, path: &Path) -> Result<Config>;
}

/// Configuration source reading YAML files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlConfigSource;

impl ConfigSource for YamlConfigSource {
    fn load(&self, path: &Path) -> Result<Config> {
        Config::from_file(path)
    }
}

impl Config {
    /// Configuration used to seed a sample file for first-time users
    pub fn sample() -> Self {
        Self {
            sensors: vec![SensorConfig {
                id: "28-000000000000".to_string(),
                alias: "fermenter".to_string(),
                low_temp: 18.0,
                high_temp: 20.0,
                heat: ActuatorConfig {
                    address: 17,
                    enabled: true,
                    invert: false,
                    min_cycle_minutes: 5.0,
                },
                cool: ActuatorConfig {
                    address: 27,
                    enabled: true,
                    invert: false,
                    min_cycle_minutes: 10.0,
                },
                verbose: false,
            }],
            ..Self::default()
        }
    }

    /// Write a sample configuration next to `path` for the user to edit.
    ///
    /// The sample is written to `<path>.sample.yaml` and its location is returned.
    pub fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<std::path::PathBuf> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::sample()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(sample_path)
    }

    /// Load configuration from a file
    ///
    /// The file is parsed as YAML, validated against the embedded JSON schema,
    /// deserialized and finally checked by [`validate_specific_rules`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse and validate a configuration held in memory
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|e| anyhow::anyhow!("Failed to compile JSON schema: {}", e))?;

        let violations: Vec<String> = validator
            .iter_errors(&json_value)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            error!("Configuration validation error before deserialization");
            anyhow::bail!(
                "Configuration validation failed: {}",
                violations.join("; ")
            );
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config =
            serde_yml::from_str(contents).context("Failed to deserialize configuration")?;

        validate_specific_rules(&config)?;
        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values explicitly provided on the command line replace the ones
    /// read from the file.
    pub fn apply_args(&mut self, web_port: Option<u16>, web_address: Option<String>) {
        if let Some(web_port) = web_port {
            debug!("Overriding port from command line: {}", web_port);
            self.visualization.port = web_port;
        }

        if let Some(web_address) = web_address {
            debug!("Overriding address from command line: {}", web_address);
            self.visualization.address = web_address;
        }
    }

    /// Find a sensor by its alias
    pub fn sensor_by_alias(&self, alias: &str) -> Option<&SensorConfig> {
        self.sensors.iter().find(|s| s.alias == alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sensors:
  - id: 28-0000075a5e5b
    alias: kegerator
    low_temp: 4.0
    high_temp: 8.0
    cool:
      address: 27
      enabled: true
      min_cycle_minutes: 10
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.sensors.len(), 1);
        let sensor = &config.sensors[0];
        assert_eq!(sensor.alias, "kegerator");
        assert!(sensor.cool.enabled);
        assert!(!sensor.heat.enabled);
        assert!(!sensor.verbose);
        assert_eq!(config.control, ControlConfig::default());
        assert!(!config.influx.enabled);
    }

    #[test]
    fn test_schema_rejects_unknown_hardware_type() {
        let yaml = format!("{}control:\n  hardware:\n    type: bluetooth\n", MINIMAL);
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("validation failed"));
    }

    #[test]
    fn test_schema_rejects_missing_band() {
        let yaml = "sensors:\n  - id: a\n    alias: b\n    low_temp: 1.0\n";
        assert!(Config::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let yaml = serde_yml::to_string(&Config::sample()).unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, Config::sample());
    }

    #[test]
    fn test_apply_args_overrides_only_given_values() {
        let mut config = Config::default();
        config.apply_args(Some(9000), None);
        assert_eq!(config.visualization.port, 9000);
        assert_eq!(config.visualization.address, VisualizationConfig::default().address);
    }
}
