// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Thermal simulation of a chamber
//!
//! A lumped model: the chamber exchanges heat with the room following
//! Newton's law of cooling, and each energized actuator adds a constant rate.
//!
//! dT/dt = k * (T_ambient - T) + heat_rate * heating - cool_rate * cooling
//!
//! Rates are expressed per minute of simulated time.

use tokio::time::Instant;

/// Ambient room temperature in Celsius
pub const AMBIENT_ROOM_TEMP_C: f64 = 20.0;

/// Physical properties of a simulated chamber
#[derive(Debug, Clone, PartialEq)]
pub struct ChamberProperties {
    /// Room temperature the chamber drifts towards
    pub ambient_c: f64,
    /// Heat exchange coefficient with the room (1/min)
    pub loss_per_minute: f64,
    /// Temperature rise per minute with the heater on
    pub heat_rate_c_per_minute: f64,
    /// Temperature drop per minute with the cooler on
    pub cool_rate_c_per_minute: f64,
}

impl Default for ChamberProperties {
    fn default() -> Self {
        // Roughly a 150 l fridge with a 60 W heat mat
        Self {
            ambient_c: AMBIENT_ROOM_TEMP_C,
            loss_per_minute: 0.01,
            heat_rate_c_per_minute: 0.15,
            cool_rate_c_per_minute: 0.4,
        }
    }
}

/// Simulated chamber
#[derive(Debug, Clone)]
pub struct ChamberSimulation {
    temperature: f64,
    heating: bool,
    cooling: bool,
    properties: ChamberProperties,
    last_update: Instant,
}

impl ChamberSimulation {
    /// Chamber starting at `temperature`
    pub fn new(temperature: f64, properties: ChamberProperties) -> Self {
        Self {
            temperature,
            heating: false,
            cooling: false,
            properties,
            last_update: Instant::now(),
        }
    }

    /// Chamber at room temperature
    pub fn at_ambient() -> Self {
        Self::new(AMBIENT_ROOM_TEMP_C, ChamberProperties::default())
    }

    /// Integrate the model up to `now`
    pub fn advance(&mut self, now: Instant) {
        let minutes = now.saturating_duration_since(self.last_update).as_secs_f64() / 60.0;
        self.last_update = now;
        if minutes <= 0.0 {
            return;
        }

        // One-second Euler steps keep the model stable for long gaps
        let steps = (minutes * 60.0).ceil().max(1.0) as u64;
        let dt = minutes / steps as f64;
        let p = &self.properties;
        for _ in 0..steps {
            let mut rate = p.loss_per_minute * (p.ambient_c - self.temperature);
            if self.heating {
                rate += p.heat_rate_c_per_minute;
            }
            if self.cooling {
                rate -= p.cool_rate_c_per_minute;
            }
            self.temperature += rate * dt;
        }
    }

    pub fn set_heating(&mut self, on: bool) {
        self.heating = on;
    }

    pub fn set_cooling(&mut self, on: bool) {
        self.cooling = on;
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn properties(&self) -> &ChamberProperties {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_passive_chamber_drifts_to_ambient() {
        let mut chamber = ChamberSimulation::new(4.0, ChamberProperties::default());
        let start = chamber.last_update;
        chamber.advance(start + Duration::from_secs(60 * 60));
        let t = chamber.temperature();
        assert!(t > 4.0 && t < AMBIENT_ROOM_TEMP_C, "temperature {}", t);
    }

    #[test]
    fn test_cooler_lowers_temperature() {
        let mut chamber = ChamberSimulation::at_ambient();
        let start = chamber.last_update;
        chamber.set_cooling(true);
        chamber.advance(start + Duration::from_secs(10 * 60));
        assert!(chamber.temperature() < AMBIENT_ROOM_TEMP_C - 3.0);
    }

    #[test]
    fn test_heater_raises_temperature() {
        let mut chamber = ChamberSimulation::at_ambient();
        let start = chamber.last_update;
        chamber.set_heating(true);
        chamber.advance(start + Duration::from_secs(10 * 60));
        assert!(chamber.temperature() > AMBIENT_ROOM_TEMP_C + 1.0);
    }
}
