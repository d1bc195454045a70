// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use log::debug;

use super::thermostat::MAX_MIN_CYCLE_MINUTES;
use super::{Config, SensorConfig, CONFIG_SCHEMA};

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./chamber_thermostat --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Sensors**: ids and aliases are non-empty and unique, the band satisfies
///   `low_temp < high_temp`, minimum cycle durations lie within 0-1440 minutes
/// - **Actuator ownership**: no two enabled actuators share a GPIO line, within
///   one sensor or across sensors
/// - **Control timing**: every interval and the publish capacity are non-zero
/// - **Server**: the status API port is within 1-65534
/// - **Metrics**: an enabled sink needs an http(s) address, a database and a
///   user agent usable as an HTTP header
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    validate_sensors(&config.sensors)?;

    let control = &config.control;
    if control.poll_interval_ms == 0 {
        anyhow::bail!("control.poll_interval_ms must be greater than zero");
    }
    if control.read_timeout_ms == 0 {
        anyhow::bail!("control.read_timeout_ms must be greater than zero");
    }
    if control.drain_timeout_ms == 0 {
        anyhow::bail!("control.drain_timeout_ms must be greater than zero");
    }
    if control.publish_capacity == 0 {
        anyhow::bail!("control.publish_capacity must be greater than zero");
    }

    if config.visualization.port < 1 || config.visualization.port > 65534 {
        anyhow::bail!("Invalid port number: {}", config.visualization.port);
    }
    if !is_valid_ip_address(&config.visualization.address) {
        // Rocket only binds IP addresses, the web server refuses to start otherwise
        debug!(
            "Potentially invalid address format: {}",
            config.visualization.address
        );
    }

    if config.influx.enabled {
        if !config.influx.addr.starts_with("http://") && !config.influx.addr.starts_with("https://")
        {
            anyhow::bail!(
                "Invalid InfluxDB address '{}': must start with http:// or https://",
                config.influx.addr
            );
        }
        if config.influx.database.is_empty() {
            anyhow::bail!("InfluxDB database must be set when the metrics sink is enabled");
        }
        if reqwest::header::HeaderValue::from_str(&config.influx.user_agent).is_err() {
            anyhow::bail!(
                "Invalid InfluxDB user_agent {:?}: not a valid HTTP header value",
                config.influx.user_agent
            );
        }
    }

    Ok(())
}

/// Validate a sensor set on its own.
///
/// This is the check a reload must pass before it may replace the running
/// configuration.
pub fn validate_sensors(sensors: &[SensorConfig]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut aliases = HashSet::new();
    // GPIO line -> alias of the sensor owning it
    let mut lines: HashMap<u32, &str> = HashMap::new();

    for sensor in sensors {
        if sensor.id.trim().is_empty() {
            anyhow::bail!("Sensor ID cannot be blank");
        }
        if sensor.alias.trim().is_empty() {
            anyhow::bail!("Alias cannot be blank for sensor '{}'", sensor.id);
        }
        if !ids.insert(sensor.id.as_str()) {
            anyhow::bail!("Duplicate sensor ID '{}' found in configuration", sensor.id);
        }
        if !aliases.insert(sensor.alias.as_str()) {
            anyhow::bail!(
                "Duplicate sensor alias '{}' found in configuration",
                sensor.alias
            );
        }

        if !sensor.low_temp.is_finite() || !sensor.high_temp.is_finite() {
            anyhow::bail!("Sensor '{}' has a non-finite temperature band", sensor.alias);
        }
        if sensor.low_temp >= sensor.high_temp {
            anyhow::bail!(
                "Sensor '{}' has low_temp {} not below high_temp {}",
                sensor.alias,
                sensor.low_temp,
                sensor.high_temp
            );
        }

        for (name, actuator) in [("heat", &sensor.heat), ("cool", &sensor.cool)] {
            if !actuator.min_cycle_minutes.is_finite()
                || actuator.min_cycle_minutes < 0.0
                || actuator.min_cycle_minutes > MAX_MIN_CYCLE_MINUTES
            {
                anyhow::bail!(
                    "Sensor '{}' {} actuator has an invalid min_cycle_minutes {}",
                    sensor.alias,
                    name,
                    actuator.min_cycle_minutes
                );
            }
            if !actuator.enabled {
                continue;
            }
            if let Some(owner) = lines.insert(actuator.address, &sensor.alias) {
                anyhow::bail!(
                    "GPIO {} is used by both '{}' and '{}' ({} actuator)",
                    actuator.address,
                    owner,
                    sensor.alias,
                    name
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActuatorConfig;

    fn sensor(id: &str, alias: &str, heat: u32, cool: u32) -> SensorConfig {
        SensorConfig {
            id: id.to_string(),
            alias: alias.to_string(),
            low_temp: 4.0,
            high_temp: 8.0,
            heat: ActuatorConfig {
                address: heat,
                enabled: true,
                invert: false,
                min_cycle_minutes: 10.0,
            },
            cool: ActuatorConfig {
                address: cool,
                enabled: true,
                invert: false,
                min_cycle_minutes: 10.0,
            },
            verbose: false,
        }
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let sensors = vec![sensor("a", "same", 1, 2), sensor("b", "same", 3, 4)];
        let err = validate_sensors(&sensors).unwrap_err();
        assert!(err.to_string().contains("Duplicate sensor alias"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let sensors = vec![sensor("a", "one", 1, 2), sensor("a", "two", 3, 4)];
        let err = validate_sensors(&sensors).unwrap_err();
        assert!(err.to_string().contains("Duplicate sensor ID"));
    }

    #[test]
    fn test_inverted_band_rejected() {
        let mut s = sensor("a", "one", 1, 2);
        s.low_temp = 9.0;
        assert!(validate_sensors(&[s]).is_err());
    }

    #[test]
    fn test_shared_gpio_rejected_unless_disabled() {
        let sensors = vec![sensor("a", "one", 1, 2), sensor("b", "two", 2, 3)];
        assert!(validate_sensors(&sensors).is_err());

        let mut second = sensor("b", "two", 2, 3);
        second.heat.enabled = false;
        assert!(validate_sensors(&[sensor("a", "one", 1, 2), second]).is_ok());
    }

    #[test]
    fn test_heat_and_cool_on_same_line_rejected() {
        assert!(validate_sensors(&[sensor("a", "one", 5, 5)]).is_err());
    }

    #[test]
    fn test_enabled_influx_requires_database() {
        let mut config = Config::default();
        config.influx.enabled = true;
        assert!(validate_specific_rules(&config).is_err());
        config.influx.database = "chamber".to_string();
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_min_cycle_upper_bound() {
        let mut s = sensor("a", "one", 1, 2);
        s.cool.min_cycle_minutes = MAX_MIN_CYCLE_MINUTES;
        assert!(validate_sensors(&[s.clone()]).is_ok());

        s.cool.min_cycle_minutes = 1e300;
        let err = validate_sensors(&[s]).unwrap_err();
        assert!(err.to_string().contains("invalid min_cycle_minutes"));
    }

    #[test]
    fn test_influx_user_agent_must_be_a_header_value() {
        let mut config = Config::default();
        config.influx.enabled = true;
        config.influx.database = "chamber".to_string();
        config.influx.user_agent = "bad\nagent".to_string();
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_is_valid_ip_address() {
        assert!(is_valid_ip_address("192.168.1.10"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("not an address"));
    }
}
