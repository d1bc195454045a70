// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Thermal regulation system for fermentation chambers
//!
//! This module provides thermal regulation capabilities including:
//! - Hardware abstraction for temperature sensors and switched actuators
//! - The hysteresis controller deciding when to heat or cool
//! - One regulation task per sensor, see [`daemon`]
//! - The lossy state publisher, see [`shared_state`]
//! - A chamber simulation for development without hardware

pub mod controller;
pub mod daemon;
pub mod drivers;
pub mod shared_state;
pub mod simulation;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info};
use thiserror::Error;

use crate::config::{ActuatorConfig, Config, HardwareKind, SensorConfig};

pub use controller::{evaluate, ActuatorKind, ControllerState, Decision, DwellState};
pub use daemon::{ControllerEvent, SensorController};
pub use shared_state::StatePublisher;

/// Failure to obtain a temperature from a sensor
#[derive(Debug, Error)]
pub enum SensorReadError {
    #[error("sensor '{0}' not found")]
    NotFound(String),

    #[error("reading sensor '{sensor_id}' timed out after {timeout:?}")]
    Timeout { sensor_id: String, timeout: Duration },

    #[error("I/O error while reading sensor '{sensor_id}': {source}")]
    Io {
        sensor_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid reading from sensor '{sensor_id}': {reason}")]
    InvalidReading { sensor_id: String, reason: String },
}

/// Failure to drive an actuator line
#[derive(Debug, Error)]
#[error("failed to drive GPIO {address} to level {level}: {reason}")]
pub struct ActuationError {
    pub address: u32,
    /// Physical level that was requested, 1 for high
    pub level: u8,
    pub reason: String,
}

impl ActuationError {
    pub fn new(address: u32, high: bool, reason: impl Into<String>) -> Self {
        Self {
            address,
            level: u8::from(high),
            reason: reason.into(),
        }
    }
}

/// Error ending a sensor controller
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Read(#[from] SensorReadError),

    #[error(transparent)]
    Actuation(#[from] ActuationError),
}

/// Temperature source trait for hardware abstraction
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemperatureSource: Send + Sync {
    /// Read the current temperature of `sensor_id` in degrees Celsius
    async fn read_temperature(&self, sensor_id: &str) -> Result<f64, SensorReadError>;

    /// Identifiers of the sensors currently visible to this source
    async fn list_sensors(&self) -> Result<Vec<String>, SensorReadError>;
}

/// Actuator driver trait for hardware abstraction
///
/// Drivers only know physical levels. Inversion is applied by the caller,
/// see [`drive_actuator`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActuatorDriver: Send + Sync {
    /// Drive the line at `address` high or low
    async fn set_level(&self, address: u32, high: bool) -> Result<(), ActuationError>;
}

/// Sensor and actuator backends shared by every controller
#[derive(Clone)]
pub struct Hardware {
    pub sensors: Arc<dyn TemperatureSource>,
    pub actuators: Arc<dyn ActuatorDriver>,
}

impl Hardware {
    pub fn new(sensors: Arc<dyn TemperatureSource>, actuators: Arc<dyn ActuatorDriver>) -> Self {
        Self { sensors, actuators }
    }
}

/// Create the hardware backends selected by the configuration
pub fn create_hardware(config: &Config) -> Hardware {
    let hardware = &config.control.hardware;
    match hardware.kind {
        HardwareKind::Sysfs => {
            info!(
                "Using 1-wire sensors in {:?} and sysfs GPIO in {:?}",
                hardware.w1_devices_path, hardware.gpio_path
            );
            Hardware::new(
                Arc::new(drivers::w1_therm::W1ThermSource::new(
                    &hardware.w1_devices_path,
                )),
                Arc::new(drivers::sysfs_gpio::SysfsGpioDriver::new(&hardware.gpio_path)),
            )
        }
        HardwareKind::Simulated => {
            info!(
                "Using simulated hardware for {} sensor(s)",
                config.sensors.len()
            );
            let simulated = Arc::new(drivers::mock::SimulatedHardware::new(&config.sensors));
            Hardware::new(simulated.clone(), simulated)
        }
    }
}

/// Drive an actuator to its logical state, applying the configured inversion
pub async fn drive_actuator(
    driver: &dyn ActuatorDriver,
    actuator: &ActuatorConfig,
    on: bool,
) -> Result<(), ActuationError> {
    driver.set_level(actuator.address, on != actuator.invert).await
}

/// Drive every enabled actuator of `sensor` off.
///
/// All actuators are attempted even when one fails; the first error is returned.
pub async fn force_off(
    driver: &dyn ActuatorDriver,
    sensor: &SensorConfig,
) -> Result<(), ActuationError> {
    let mut first_error = None;
    for actuator in sensor.enabled_actuators() {
        if let Err(e) = drive_actuator(driver, actuator, false).await {
            error!("Sensor '{}': {}", sensor.alias, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn sensor() -> SensorConfig {
        SensorConfig {
            id: "28-1".to_string(),
            alias: "one".to_string(),
            low_temp: 4.0,
            high_temp: 8.0,
            heat: ActuatorConfig {
                address: 17,
                enabled: true,
                invert: true,
                min_cycle_minutes: 0.0,
            },
            cool: ActuatorConfig {
                address: 27,
                enabled: false,
                invert: false,
                min_cycle_minutes: 0.0,
            },
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_drive_actuator_applies_inversion() {
        let mut driver = MockActuatorDriver::new();
        driver
            .expect_set_level()
            .with(eq(17), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        drive_actuator(&driver, &sensor().heat, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_force_off_skips_disabled_actuators() {
        let mut driver = MockActuatorDriver::new();
        // Inverted heat line: off means high
        driver
            .expect_set_level()
            .with(eq(17), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));
        driver.expect_set_level().with(eq(27), eq(false)).never();
        force_off(&driver, &sensor()).await.unwrap();
    }

    #[tokio::test]
    async fn test_force_off_reports_failure() {
        let mut driver = MockActuatorDriver::new();
        driver
            .expect_set_level()
            .returning(|address, high| Err(ActuationError::new(address, high, "EBUSY")));
        let err = force_off(&driver, &sensor()).await.unwrap_err();
        assert_eq!(err.address, 17);
        assert!(err.to_string().contains("EBUSY"));
    }
}
