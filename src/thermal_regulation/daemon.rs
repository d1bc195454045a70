// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sensor controller daemon
//!
//! Each configured sensor runs its own [`SensorController`] task. The task
//! reads the sensor on a fixed interval, evaluates the hysteresis rules,
//! drives the actuators and publishes its state. A new configuration is
//! applied as soon as it is received and acknowledged on the `applied`
//! channel. The task stops when its cancellation token fires, when its
//! configuration sender is dropped or on the first reading or actuation
//! error, and always drives its enabled actuators off before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, log, warn, Level};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SensorConfig;
use crate::thermal_regulation::controller::{evaluate, ActuatorKind, ControllerState, Decision};
use crate::thermal_regulation::shared_state::StatePublisher;
use crate::thermal_regulation::{
    drive_actuator, ControllerError, Hardware, SensorReadError,
};

/// Events sent by controllers to their supervisor
#[derive(Debug)]
pub enum ControllerEvent {
    /// The controller stopped on an error
    Failed {
        sensor_id: String,
        alias: String,
        error: ControllerError,
    },
}

/// Control loop of a single sensor
pub struct SensorController {
    sensor_id: String,
    config: watch::Receiver<Arc<SensorConfig>>,
    applied: watch::Sender<Arc<SensorConfig>>,
    hardware: Hardware,
    publisher: StatePublisher,
    poll_interval: Duration,
    read_timeout: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ControllerEvent>,
    state: Option<ControllerState>,
}

impl SensorController {
    pub fn new(
        config: watch::Receiver<Arc<SensorConfig>>,
        hardware: Hardware,
        publisher: StatePublisher,
        poll_interval: Duration,
        read_timeout: Duration,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        let initial = config.borrow().clone();
        let (applied, _) = watch::channel(Arc::clone(&initial));
        Self {
            sensor_id: initial.id.clone(),
            config,
            applied,
            hardware,
            publisher,
            poll_interval,
            read_timeout,
            cancel,
            events,
            state: None,
        }
    }

    /// Follow the configuration the controller actually works with.
    ///
    /// Once a value sent on the configuration channel shows up here, lines
    /// the controller no longer uses have been released. The channel closes
    /// when the controller stops, after its actuators were driven off.
    pub fn applied(&self) -> watch::Receiver<Arc<SensorConfig>> {
        self.applied.subscribe()
    }

    /// Run the controller in a new task.
    ///
    /// A failure is reported through the events channel once the actuators
    /// have been driven off.
    pub fn spawn(self) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            let sensor_id = self.sensor_id.clone();
            let config = self.config.clone();
            if let Err(error) = self.run().await {
                let alias = config.borrow().alias.clone();
                error!("Controller for '{}' ({}) stopped: {}", alias, sensor_id, error);
                // The supervisor may already be gone during shutdown
                let _ = events.send(ControllerEvent::Failed {
                    sensor_id,
                    alias,
                    error,
                });
            }
        })
    }

    /// Run the control loop until cancelled or failed
    pub async fn run(mut self) -> Result<(), ControllerError> {
        let mut active = self.config.borrow_and_update().clone();
        self.applied.send_replace(Arc::clone(&active));
        info!(
            "Starting controller for '{}' ({}), band [{}, {}]",
            active.alias, active.id, active.low_temp, active.high_temp
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                changed = self.config.changed() => {
                    if changed.is_err() {
                        warn!("'{}': configuration channel closed, stopping", active.alias);
                        break Ok(());
                    }
                    match self.refresh_config(&mut active).await {
                        Ok(()) => continue,
                        Err(e) => break Err(e),
                    }
                }
                _ = interval.tick() => {}
            }

            match self.iterate(&mut active).await {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let shutdown = self.release_all(&active).await;
        info!("Controller for '{}' ({}) stopped", active.alias, active.id);
        result.and(shutdown)
    }

    /// One control iteration; `Ok(false)` when cancelled during the read
    async fn iterate(&mut self, active: &mut Arc<SensorConfig>) -> Result<bool, ControllerError> {
        if self.config.has_changed().unwrap_or(false) {
            self.refresh_config(active).await?;
        }

        let Some(temperature) = self.read().await? else {
            return Ok(false);
        };

        let now = Instant::now();
        let sensor = active.as_ref();
        let state = self
            .state
            .get_or_insert_with(|| ControllerState::new(sensor, temperature, now, Utc::now()));
        state.record_reading(temperature, now, Utc::now());

        let level = if sensor.verbose {
            Level::Info
        } else {
            Level::Debug
        };
        log!(
            level,
            "'{}': {:.3}°C [{}, {}] heating={} cooling={}",
            sensor.alias,
            temperature,
            sensor.low_temp,
            sensor.high_temp,
            state.heating,
            state.cooling
        );

        match evaluate(sensor, state, now) {
            Decision::Hold => {}
            Decision::InvalidBand => warn!(
                "'{}': {}°C is both above {} and below {}, not actuating",
                sensor.alias, temperature, sensor.high_temp, sensor.low_temp
            ),
            decision => {
                if let Some((kind, on)) = decision.transition() {
                    self.switch(sensor, kind, on).await?;
                }
            }
        }

        if let Some(state) = &self.state {
            self.publisher.publish(state.clone());
        }
        Ok(true)
    }

    /// Read the sensor, `None` when cancelled first
    async fn read(&self) -> Result<Option<f64>, SensorReadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Ok(None),
            reading = time::timeout(
                self.read_timeout,
                self.hardware.sensors.read_temperature(&self.sensor_id),
            ) => match reading {
                Ok(reading) => reading.map(Some),
                Err(_) => Err(SensorReadError::Timeout {
                    sensor_id: self.sensor_id.clone(),
                    timeout: self.read_timeout,
                }),
            },
        }
    }

    /// Drive an actuator and record the transition once the line has switched
    async fn switch(
        &mut self,
        sensor: &SensorConfig,
        kind: ActuatorKind,
        on: bool,
    ) -> Result<(), ControllerError> {
        drive_actuator(self.hardware.actuators.as_ref(), kind.config(sensor), on).await?;
        if let Some(state) = self.state.as_mut() {
            state.commit(kind, on, Instant::now(), Utc::now());
        }
        info!(
            "'{}': {} {}",
            sensor.alias,
            kind,
            if on { "on" } else { "off" }
        );
        Ok(())
    }

    /// Switch to the latest configuration and acknowledge it
    async fn refresh_config(&mut self, active: &mut Arc<SensorConfig>) -> Result<(), ControllerError> {
        let next = self.config.borrow_and_update().clone();
        let previous = Arc::clone(active);
        self.apply_reload(&previous, &next).await?;
        *active = Arc::clone(&next);
        self.applied.send_replace(next);
        Ok(())
    }

    /// Take a new configuration into account.
    ///
    /// Actuators whose line changed are released on the old line, and the
    /// new line is driven off before the controller may use it.
    async fn apply_reload(
        &mut self,
        previous: &SensorConfig,
        next: &SensorConfig,
    ) -> Result<(), ControllerError> {
        info!(
            "'{}' reconfigured: band [{}, {}]",
            next.alias, next.low_temp, next.high_temp
        );
        for kind in ActuatorKind::ALL {
            let old = kind.config(previous);
            let new = kind.config(next);
            if !old.wiring_differs(new) {
                continue;
            }
            let engaged = self.state.as_ref().is_some_and(|s| s.is_on(kind));
            if engaged {
                debug!("'{}': releasing {} before rewiring", previous.alias, kind);
                self.switch(previous, kind, false).await?;
            }
            if new.enabled {
                drive_actuator(self.hardware.actuators.as_ref(), new, false).await?;
            }
        }
        if previous.alias != next.alias {
            // Queued behind every update published under the old alias
            self.publisher.retire(&previous.alias).await;
            if let Some(state) = self.state.as_mut() {
                state.alias = next.alias.clone();
            }
        }
        Ok(())
    }

    /// Drive every enabled actuator off and publish the final state
    async fn release_all(&mut self, sensor: &SensorConfig) -> Result<(), ControllerError> {
        let mut first_error = None;
        for kind in ActuatorKind::ALL {
            let actuator = kind.config(sensor);
            if !actuator.enabled {
                continue;
            }
            match drive_actuator(self.hardware.actuators.as_ref(), actuator, false).await {
                Ok(()) => {
                    if let Some(state) = self.state.as_mut() {
                        if state.is_on(kind) {
                            state.commit(kind, false, Instant::now(), Utc::now());
                        }
                    }
                }
                Err(e) => {
                    error!("'{}': could not release {}: {}", sensor.alias, kind, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(state) = &self.state {
            self.publisher.publish(state.clone());
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
