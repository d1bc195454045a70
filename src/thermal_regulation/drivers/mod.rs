// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hardware drivers for thermal regulation
//!
//! This module provides the sensor and actuator implementations:
//! - W1Therm: DS18B20 sensors through the kernel w1-therm driver
//! - SysfsGpio: relays driven through `/sys/class/gpio`
//! - Mock: simulated chambers for testing and development

pub mod mock;
pub mod sysfs_gpio;
pub mod w1_therm;

pub use mock::SimulatedHardware;
pub use sysfs_gpio::SysfsGpioDriver;
pub use w1_therm::W1ThermSource;
