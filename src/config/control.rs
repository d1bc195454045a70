// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Control loop timing and hardware backend configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timing shared by every sensor controller and the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Delay between two iterations of one controller, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on a single temperature reading, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// How long a stop waits for controllers to de-energize, in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Capacity of the state publisher queue; snapshots beyond it are dropped
    #[serde(default = "default_publish_capacity")]
    pub publish_capacity: usize,

    /// Hardware backend for sensors and actuators
    #[serde(default)]
    pub hardware: HardwareConfig,
}

/// Hardware backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Backend type
    #[serde(rename = "type", default)]
    pub kind: HardwareKind,

    /// Directory holding the 1-wire slave devices
    #[serde(default = "default_w1_devices_path")]
    pub w1_devices_path: PathBuf,

    /// Root of the sysfs GPIO interface
    #[serde(default = "default_gpio_path")]
    pub gpio_path: PathBuf,
}

/// Hardware backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HardwareKind {
    /// DS18B20 sensors over the kernel w1-therm driver, relays over sysfs GPIO
    #[default]
    Sysfs,
    /// Simulated chambers for development without hardware
    Simulated,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_publish_capacity() -> usize {
    64
}

fn default_w1_devices_path() -> PathBuf {
    PathBuf::from("/sys/bus/w1/devices")
}

fn default_gpio_path() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            publish_capacity: default_publish_capacity(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            kind: HardwareKind::default(),
            w1_devices_path: default_w1_devices_path(),
            gpio_path: default_gpio_path(),
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
