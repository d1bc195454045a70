// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Shared fakes for the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chamber_thermostat::config::{ActuatorConfig, Config, ConfigSource, SensorConfig};
use chamber_thermostat::thermal_regulation::{
    ActuationError, ActuatorDriver, Hardware, SensorReadError, TemperatureSource,
};

/// Actuator driver remembering every write
#[derive(Default)]
pub struct RecordingDriver {
    writes: Mutex<Vec<(u32, bool)>>,
    failing: Mutex<HashSet<u32>>,
}

impl RecordingDriver {
    /// Every `(address, level)` written so far, in order
    pub fn writes(&self) -> Vec<(u32, bool)> {
        self.writes.lock().unwrap().clone()
    }

    /// Last level written to `address`
    pub fn level(&self, address: u32) -> Option<bool> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(a, _)| *a == address)
            .map(|(_, high)| *high)
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Make writes to `address` fail
    pub fn fail(&self, address: u32) {
        self.failing.lock().unwrap().insert(address);
    }
}

#[async_trait]
impl ActuatorDriver for RecordingDriver {
    async fn set_level(&self, address: u32, high: bool) -> Result<(), ActuationError> {
        if self.failing.lock().unwrap().contains(&address) {
            return Err(ActuationError::new(address, high, "line stuck"));
        }
        self.writes.lock().unwrap().push((address, high));
        Ok(())
    }
}

/// Temperature source returning values set by the test; unknown sensors are not found
#[derive(Default)]
pub struct ScriptedSource {
    temperatures: Mutex<HashMap<String, f64>>,
}

impl ScriptedSource {
    pub fn set(&self, sensor_id: &str, temperature: f64) {
        self.temperatures
            .lock()
            .unwrap()
            .insert(sensor_id.to_string(), temperature);
    }

    pub fn unplug(&self, sensor_id: &str) {
        self.temperatures.lock().unwrap().remove(sensor_id);
    }
}

#[async_trait]
impl TemperatureSource for ScriptedSource {
    async fn read_temperature(&self, sensor_id: &str) -> Result<f64, SensorReadError> {
        self.temperatures
            .lock()
            .unwrap()
            .get(sensor_id)
            .copied()
            .ok_or_else(|| SensorReadError::NotFound(sensor_id.to_string()))
    }

    async fn list_sensors(&self) -> Result<Vec<String>, SensorReadError> {
        let mut ids: Vec<String> = self.temperatures.lock().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Configuration source the test can rewrite between reloads
#[derive(Default)]
pub struct MemoryConfigSource {
    config: Mutex<Config>,
}

impl MemoryConfigSource {
    pub fn new(config: Config) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    pub fn set(&self, config: Config) {
        *self.config.lock().unwrap() = config;
    }
}

impl ConfigSource for MemoryConfigSource {
    fn load(&self, _path: &Path) -> anyhow::Result<Config> {
        Ok(self.config.lock().unwrap().clone())
    }
}

pub fn actuator(address: u32) -> ActuatorConfig {
    ActuatorConfig {
        address,
        enabled: true,
        invert: false,
        min_cycle_minutes: 0.0,
    }
}

pub fn sensor(id: &str, alias: &str, heat: u32, cool: u32) -> SensorConfig {
    SensorConfig {
        id: id.to_string(),
        alias: alias.to_string(),
        low_temp: 18.0,
        high_temp: 20.0,
        heat: actuator(heat),
        cool: actuator(cool),
        verbose: false,
    }
}

pub fn config(sensors: Vec<SensorConfig>) -> Config {
    let mut config = Config::default();
    config.visualization.enabled = false;
    config.sensors = sensors;
    config
}

pub fn hardware(source: &Arc<ScriptedSource>, driver: &Arc<RecordingDriver>) -> Hardware {
    Hardware::new(source.clone(), driver.clone())
}
