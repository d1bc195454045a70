// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-sensor thermostat configuration
//!
//! A [`SensorConfig`] binds one temperature sensor to a heating and a cooling
//! actuator and defines the band the controller keeps the reading in.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted `min_cycle_minutes`, one day
pub const MAX_MIN_CYCLE_MINUTES: f64 = 1440.0;

/// Configuration of one sensor/actuator pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Hardware identifier of the sensor (e.g. a DS18B20 `28-…` id)
    pub id: String,

    /// Unique human-readable name, used as the key of published states
    pub alias: String,

    /// Lower bound of the band, heating engages below it
    pub low_temp: f64,

    /// Upper bound of the band, cooling engages above it
    pub high_temp: f64,

    /// Heating actuator
    #[serde(default)]
    pub heat: ActuatorConfig,

    /// Cooling actuator
    #[serde(default)]
    pub cool: ActuatorConfig,

    /// Log every control iteration at info level
    #[serde(default)]
    pub verbose: bool,
}

/// One switched actuator (relay, SSR) driven through a GPIO line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ActuatorConfig {
    /// GPIO line number driving the actuator
    #[serde(default)]
    pub address: u32,

    /// Disabled actuators are never read nor written
    #[serde(default)]
    pub enabled: bool,

    /// Drive the line low to energize (normally-closed wiring)
    #[serde(default)]
    pub invert: bool,

    /// Minimum time between two transitions, in minutes
    #[serde(default)]
    pub min_cycle_minutes: f64,
}

impl ActuatorConfig {
    /// Minimum dwell time before this actuator may change state again
    ///
    /// Values too large for a `Duration` saturate, the controller then only
    /// switches through safety overrides.
    pub fn min_cycle(&self) -> Duration {
        if self.min_cycle_minutes.is_finite() && self.min_cycle_minutes > 0.0 {
            Duration::try_from_secs_f64(self.min_cycle_minutes * 60.0).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Whether switching from `self` to `other` rewires the physical line
    pub fn wiring_differs(&self, other: &ActuatorConfig) -> bool {
        self.address != other.address || self.invert != other.invert || self.enabled != other.enabled
    }
}

impl SensorConfig {
    /// Enabled actuators of this sensor, heating first
    pub fn enabled_actuators(&self) -> impl Iterator<Item = &ActuatorConfig> {
        [&self.heat, &self.cool].into_iter().filter(|a| a.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_cycle_conversion() {
        let actuator = ActuatorConfig {
            min_cycle_minutes: 2.5,
            ..ActuatorConfig::default()
        };
        assert_eq!(actuator.min_cycle(), Duration::from_secs(150));

        let negative = ActuatorConfig {
            min_cycle_minutes: -1.0,
            ..ActuatorConfig::default()
        };
        assert_eq!(negative.min_cycle(), Duration::ZERO);

        let huge = ActuatorConfig {
            min_cycle_minutes: 1e300,
            ..ActuatorConfig::default()
        };
        assert_eq!(huge.min_cycle(), Duration::MAX);
    }

    #[test]
    fn test_wiring_differs_ignores_cycle_time() {
        let a = ActuatorConfig {
            address: 4,
            enabled: true,
            invert: false,
            min_cycle_minutes: 1.0,
        };
        let mut b = a.clone();
        b.min_cycle_minutes = 20.0;
        assert!(!a.wiring_differs(&b));
        b.invert = true;
        assert!(a.wiring_differs(&b));
    }
}
