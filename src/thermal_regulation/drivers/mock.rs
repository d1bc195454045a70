// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated hardware for development without sensors or relays
//!
//! [`SimulatedHardware`] implements both hardware traits. Every configured
//! sensor gets its own [`ChamberSimulation`], and the GPIO lines of its
//! actuators are wired to that chamber's heater and cooler. Driving a line
//! changes the chamber model, reading a sensor integrates the model up to the
//! current time.
//!
//! The wiring is taken from the configuration the daemon starts with. Lines
//! added by a later reload are recorded but drive nothing; sensors unknown at
//! startup read as a passive chamber at room temperature.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use crate::config::SensorConfig;
use crate::thermal_regulation::controller::ActuatorKind;
use crate::thermal_regulation::simulation::ChamberSimulation;
use crate::thermal_regulation::{
    ActuationError, ActuatorDriver, SensorReadError, TemperatureSource,
};

/// Where a GPIO line is wired in the simulation
#[derive(Debug, Clone)]
struct Wiring {
    sensor_id: String,
    kind: ActuatorKind,
    invert: bool,
}

#[derive(Debug, Default)]
struct SimulationState {
    chambers: HashMap<String, ChamberSimulation>,
    wiring: HashMap<u32, Wiring>,
    levels: HashMap<u32, bool>,
}

/// Chambers and relays simulated in memory
#[derive(Debug)]
pub struct SimulatedHardware {
    state: Mutex<SimulationState>,
}

impl SimulatedHardware {
    /// Simulate one chamber per sensor, wired as configured
    pub fn new(sensors: &[SensorConfig]) -> Self {
        let mut state = SimulationState::default();
        for sensor in sensors {
            state
                .chambers
                .insert(sensor.id.clone(), ChamberSimulation::at_ambient());
            for kind in ActuatorKind::ALL {
                let actuator = kind.config(sensor);
                if actuator.enabled {
                    state.wiring.insert(
                        actuator.address,
                        Wiring {
                            sensor_id: sensor.id.clone(),
                            kind,
                            invert: actuator.invert,
                        },
                    );
                }
            }
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Last physical level written to `address`, if any
    pub fn level(&self, address: u32) -> Option<bool> {
        self.lock().levels.get(&address).copied()
    }

    /// Replace the chamber of `sensor_id`
    pub fn set_chamber(&self, sensor_id: &str, chamber: ChamberSimulation) {
        self.lock().chambers.insert(sensor_id.to_string(), chamber);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TemperatureSource for SimulatedHardware {
    async fn read_temperature(&self, sensor_id: &str) -> Result<f64, SensorReadError> {
        let now = Instant::now();
        let mut state = self.lock();
        let chamber = state
            .chambers
            .entry(sensor_id.to_string())
            .or_insert_with(ChamberSimulation::at_ambient);
        chamber.advance(now);
        // Match the 1/16 degree resolution of a DS18B20
        Ok((chamber.temperature() * 16.0).round() / 16.0)
    }

    async fn list_sensors(&self) -> Result<Vec<String>, SensorReadError> {
        let mut ids: Vec<String> = self.lock().chambers.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ActuatorDriver for SimulatedHardware {
    async fn set_level(&self, address: u32, high: bool) -> Result<(), ActuationError> {
        let now = Instant::now();
        let mut state = self.lock();
        state.levels.insert(address, high);

        let Some(wiring) = state.wiring.get(&address).cloned() else {
            debug!("Simulated GPIO {} set to {} (not wired)", address, high);
            return Ok(());
        };
        if let Some(chamber) = state.chambers.get_mut(&wiring.sensor_id) {
            // Settle the model under the previous actuator state first
            chamber.advance(now);
            let on = high != wiring.invert;
            match wiring.kind {
                ActuatorKind::Heat => chamber.set_heating(on),
                ActuatorKind::Cool => chamber.set_cooling(on),
            }
            debug!(
                "Simulated {} for '{}' {}",
                wiring.kind,
                wiring.sensor_id,
                if on { "on" } else { "off" }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActuatorConfig;
    use crate::thermal_regulation::simulation::ChamberProperties;
    use std::time::Duration;

    fn sensor() -> SensorConfig {
        SensorConfig {
            id: "28-sim".to_string(),
            alias: "sim".to_string(),
            low_temp: 4.0,
            high_temp: 8.0,
            heat: ActuatorConfig::default(),
            cool: ActuatorConfig {
                address: 27,
                enabled: true,
                invert: true,
                min_cycle_minutes: 0.0,
            },
            verbose: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_cooler_line_cools_chamber() {
        let hardware = SimulatedHardware::new(&[sensor()]);
        hardware.set_chamber(
            "28-sim",
            ChamberSimulation::new(10.0, ChamberProperties::default()),
        );

        // Inverted wiring: low energizes
        hardware.set_level(27, false).await.unwrap();
        assert_eq!(hardware.level(27), Some(false));
        tokio::time::advance(Duration::from_secs(5 * 60)).await;

        let t = hardware.read_temperature("28-sim").await.unwrap();
        assert!(t < 9.0, "temperature {}", t);
    }

    #[tokio::test]
    async fn test_unknown_sensor_reads_ambient() {
        let hardware = SimulatedHardware::new(&[]);
        let t = hardware.read_temperature("28-other").await.unwrap();
        assert_eq!(t, 20.0);
        assert_eq!(hardware.list_sensors().await.unwrap(), vec!["28-other"]);
    }
}
