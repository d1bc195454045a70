// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Hysteresis controller
//!
//! The controller keeps a reading inside `[low_temp, high_temp]` with two
//! on/off actuators. Decisions are computed by [`evaluate`], a pure function of
//! the sensor configuration, the current [`ControllerState`] and the current
//! monotonic time, so the rules can be tested without hardware or timers.
//!
//! Every non-override transition waits for the minimum cycle duration of the
//! actuator it switches, measured from the last logical transition of the
//! controller. Heating is always released above the band and cooling below
//! it, whatever the dwell time.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{ActuatorConfig, SensorConfig};

/// The two actuators of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Heat,
    Cool,
}

impl ActuatorKind {
    pub const ALL: [ActuatorKind; 2] = [ActuatorKind::Heat, ActuatorKind::Cool];

    /// Configuration of this actuator within `sensor`
    pub fn config(self, sensor: &SensorConfig) -> &ActuatorConfig {
        match self {
            ActuatorKind::Heat => &sensor.heat,
            ActuatorKind::Cool => &sensor.cool,
        }
    }
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorKind::Heat => f.write_str("heating"),
            ActuatorKind::Cool => f.write_str("cooling"),
        }
    }
}

/// Time reference for the minimum cycle protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DwellState {
    /// No reading yet, nothing to protect
    #[default]
    Idle,
    /// An actuator has been on since `since`
    Engaged { since: Instant },
    /// Every actuator has been off since `since`
    Disengaged { since: Instant },
}

impl DwellState {
    /// Time spent in the current state, `None` while idle
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        match self {
            DwellState::Idle => None,
            DwellState::Engaged { since } | DwellState::Disengaged { since } => {
                Some(now.saturating_duration_since(*since))
            }
        }
    }

    /// Whether a transition guarded by `min_cycle` may happen at `now`
    pub fn allows(&self, now: Instant, min_cycle: Duration) -> bool {
        self.elapsed(now).map_or(true, |dwell| dwell >= min_cycle)
    }
}

/// Live state of one sensor controller.
///
/// Copies of this value are published after every iteration. The dwell
/// representation relies on a monotonic clock and is not serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub sensor_id: String,
    pub alias: String,
    pub temperature: f64,
    pub heating: bool,
    pub cooling: bool,
    pub last_reading_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    #[serde(skip)]
    pub dwell: DwellState,
}

impl ControllerState {
    /// State built from the first reading of a controller, every actuator off.
    ///
    /// The dwell timer starts with this reading.
    pub fn new(sensor: &SensorConfig, temperature: f64, now: Instant, at: DateTime<Utc>) -> Self {
        let mut state = Self {
            sensor_id: sensor.id.clone(),
            alias: sensor.alias.clone(),
            temperature,
            heating: false,
            cooling: false,
            last_reading_at: at,
            last_changed_at: at,
            dwell: DwellState::Idle,
        };
        state.record_reading(temperature, now, at);
        state
    }

    /// Store a new reading
    pub fn record_reading(&mut self, temperature: f64, now: Instant, at: DateTime<Utc>) {
        self.temperature = temperature;
        self.last_reading_at = at;
        if self.dwell == DwellState::Idle {
            self.dwell = DwellState::Disengaged { since: now };
        }
    }

    pub fn is_on(&self, kind: ActuatorKind) -> bool {
        match kind {
            ActuatorKind::Heat => self.heating,
            ActuatorKind::Cool => self.cooling,
        }
    }

    /// Record a logical transition of `kind` once the line has been driven
    pub fn commit(&mut self, kind: ActuatorKind, on: bool, now: Instant, at: DateTime<Utc>) {
        match kind {
            ActuatorKind::Heat => self.heating = on,
            ActuatorKind::Cool => self.cooling = on,
        }
        self.dwell = if self.heating || self.cooling {
            DwellState::Engaged { since: now }
        } else {
            DwellState::Disengaged { since: now }
        };
        self.last_changed_at = at;
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do
    Hold,
    /// The reading is both above and below the band
    InvalidBand,
    /// Release an actuator working against the reading, dwell ignored
    Override(ActuatorKind),
    /// Switch an actuator on
    Engage(ActuatorKind),
    /// Switch an actuator off, the reading is back in band
    Disengage(ActuatorKind),
}

impl Decision {
    /// Target state of the switched actuator, if any
    pub fn transition(self) -> Option<(ActuatorKind, bool)> {
        match self {
            Decision::Hold | Decision::InvalidBand => None,
            Decision::Override(kind) | Decision::Disengage(kind) => Some((kind, false)),
            Decision::Engage(kind) => Some((kind, true)),
        }
    }
}

/// Decide what to do with the latest reading held by `state`
pub fn evaluate(sensor: &SensorConfig, state: &ControllerState, now: Instant) -> Decision {
    let t = state.temperature;
    let ready = |kind: ActuatorKind| state.dwell.allows(now, kind.config(sensor).min_cycle());

    let above = t > sensor.high_temp;
    let below = t < sensor.low_temp;

    if above && below {
        return Decision::InvalidBand;
    }

    if above {
        if state.heating {
            return Decision::Override(ActuatorKind::Heat);
        }
        if !state.cooling && sensor.cool.enabled && ready(ActuatorKind::Cool) {
            return Decision::Engage(ActuatorKind::Cool);
        }
        return Decision::Hold;
    }

    if below {
        if state.cooling {
            return Decision::Override(ActuatorKind::Cool);
        }
        if !state.heating && sensor.heat.enabled && ready(ActuatorKind::Heat) {
            return Decision::Engage(ActuatorKind::Heat);
        }
        return Decision::Hold;
    }

    if state.cooling && ready(ActuatorKind::Cool) {
        return Decision::Disengage(ActuatorKind::Cool);
    }
    if state.heating && ready(ActuatorKind::Heat) {
        return Decision::Disengage(ActuatorKind::Heat);
    }
    Decision::Hold
}
