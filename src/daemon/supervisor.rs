// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Controller supervisor
//!
//! The [`Supervisor`] owns one [`SensorController`] task per configured
//! sensor. It forces actuators off before handing them to a controller,
//! applies configuration reloads without restarting surviving controllers,
//! and drains every controller on stop so that no actuator is left energized.
//!
//! A GPIO line moved from a surviving sensor to a new one is only handed over
//! once the surviving controller has acknowledged its new configuration.
//!
//! Phases: `Created -> Running -> Draining -> Stopped`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{validate_specific_rules, Config, ConfigSource, ControlConfig, SensorConfig};
use crate::thermal_regulation::{
    force_off, ControllerEvent, Hardware, SensorController, StatePublisher,
};

/// Lifecycle phase of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Created,
    Running,
    Draining,
    Stopped,
}

/// Supervisor failures
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The configuration was rejected; the previous one stays in effect
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),

    /// Some controllers had to be aborted, their actuators were forced off
    #[error("controllers did not stop within the drain timeout: {}", .sensors.join(", "))]
    DrainTimeout { sensors: Vec<String> },

    #[error("cannot {operation} a supervisor in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: SupervisorPhase,
    },
}

/// Outcome of a successful reload, by alias
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// New sensors now running
    pub added: Vec<String>,
    /// Sensors stopped because they left the configuration
    pub removed: Vec<String>,
    /// Running sensors that received a new configuration
    pub updated: Vec<String>,
    /// Previously failed sensors running again
    pub restarted: Vec<String>,
    /// Sensors that could not be started, because forcing their actuators off
    /// failed or because another controller still held one of their lines
    pub failed: Vec<String>,
}

struct ControllerSlot {
    config: watch::Sender<Arc<SensorConfig>>,
    applied: watch::Receiver<Arc<SensorConfig>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ControllerSlot {
    fn sensor(&self) -> Arc<SensorConfig> {
        self.config.borrow().clone()
    }
}

/// Lines a surviving controller gives up on reload
struct Handover {
    alias: String,
    lines: Vec<u32>,
    applied: watch::Receiver<Arc<SensorConfig>>,
    target: Arc<SensorConfig>,
}

/// Enabled lines of `old` that `new` no longer uses
fn released_lines(old: &SensorConfig, new: &SensorConfig) -> Vec<u32> {
    old.enabled_actuators()
        .map(|a| a.address)
        .filter(|address| !new.enabled_actuators().any(|a| a.address == *address))
        .collect()
}

/// Runs and reconfigures the sensor controllers
pub struct Supervisor {
    phase: SupervisorPhase,
    source: Arc<dyn ConfigSource>,
    config_path: PathBuf,
    config: watch::Sender<Arc<Config>>,
    hardware: Hardware,
    publisher: StatePublisher,
    cancel: CancellationToken,
    controllers: HashMap<String, ControllerSlot>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ControllerEvent>>,
}

impl Supervisor {
    /// Create a supervisor reloading its configuration from `config_path`
    pub fn new(
        source: Arc<dyn ConfigSource>,
        config_path: impl Into<PathBuf>,
        hardware: Hardware,
        publisher: StatePublisher,
    ) -> Self {
        let (config, _) = watch::channel(Arc::new(Config::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            phase: SupervisorPhase::Created,
            source,
            config_path: config_path.into(),
            config,
            hardware,
            publisher,
            cancel: CancellationToken::new(),
            controllers: HashMap::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    /// Configuration currently in effect
    pub fn config(&self) -> Arc<Config> {
        self.config.borrow().clone()
    }

    /// Follow the configuration in effect
    pub fn subscribe_config(&self) -> watch::Receiver<Arc<Config>> {
        self.config.subscribe()
    }

    /// Take the receiver of controller events; only the first call gets it
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ControllerEvent>> {
        self.events_rx.take()
    }

    /// Ids of the sensors with a live controller, sorted
    pub fn running_sensors(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .controllers
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Force every actuator off and start one controller per sensor
    pub async fn start(&mut self, config: Config) -> Result<(), SupervisorError> {
        self.expect_phase("start", SupervisorPhase::Created)?;
        validate_specific_rules(&config).map_err(SupervisorError::Config)?;

        info!(
            "Starting supervisor with {} sensor(s)",
            config.sensors.len()
        );
        self.phase = SupervisorPhase::Running;

        let mut ready = Vec::with_capacity(config.sensors.len());
        for sensor in &config.sensors {
            if self.release(sensor).await {
                ready.push(sensor.clone());
            }
        }
        for sensor in ready {
            self.spawn_controller(sensor, &config.control);
        }

        self.config.send_replace(Arc::new(config));
        Ok(())
    }

    /// Load the configuration again and apply it to the running controllers.
    ///
    /// An invalid configuration is rejected and the current one stays in effect.
    pub async fn reload(&mut self) -> Result<ReloadReport, SupervisorError> {
        self.expect_phase("reload", SupervisorPhase::Running)?;
        info!("Reloading configuration from {:?}", self.config_path);

        let next = match self
            .source
            .load(&self.config_path)
            .and_then(|config| validate_specific_rules(&config).map(|_| config))
        {
            Ok(config) => config,
            Err(e) => {
                error!("Reload rejected, keeping current configuration: {:#}", e);
                return Err(SupervisorError::Config(e));
            }
        };

        let current = self.config();
        let previous: HashMap<&str, &SensorConfig> = current
            .sensors
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();
        let next_ids: HashSet<&str> = next.sensors.iter().map(|s| s.id.as_str()).collect();
        let mut report = ReloadReport::default();

        self.reap_finished().await;

        // Stop sensors that left the configuration
        let drain_timeout = next.control.drain_timeout();
        for sensor in current.sensors.iter().filter(|s| !next_ids.contains(s.id.as_str())) {
            if let Some(slot) = self.controllers.remove(&sensor.id) {
                let alias = slot.sensor().alias.clone();
                if !self.stop_controller(slot, Instant::now() + drain_timeout).await {
                    warn!("Controller for '{}' had to be aborted", alias);
                }
                self.publisher.retire(&alias).await;
            } else {
                self.publisher.retire(&sensor.alias).await;
            }
            report.removed.push(sensor.alias.clone());
        }

        // Swap the configuration of surviving controllers, collect the others
        let mut to_start = Vec::new();
        let mut handovers = Vec::new();
        for sensor in &next.sensors {
            match self.controllers.get(&sensor.id) {
                Some(slot) => {
                    let current = slot.sensor();
                    if *current != *sensor {
                        let target = Arc::new(sensor.clone());
                        slot.config.send_replace(Arc::clone(&target));
                        report.updated.push(sensor.alias.clone());
                        let lines = released_lines(&current, sensor);
                        if !lines.is_empty() {
                            handovers.push(Handover {
                                alias: sensor.alias.clone(),
                                lines,
                                applied: slot.applied.clone(),
                                target,
                            });
                        }
                    }
                }
                None => to_start.push(sensor.clone()),
            }
        }

        let claimed: HashSet<u32> = to_start
            .iter()
            .flat_map(|s| s.enabled_actuators().map(|a| a.address))
            .collect();
        let held = await_handovers(handovers, &claimed, Instant::now() + drain_timeout).await;

        for sensor in to_start {
            if let Some(line) = sensor
                .enabled_actuators()
                .map(|a| a.address)
                .find(|address| held.contains(address))
            {
                error!(
                    "GPIO {} of '{}' is still held by another controller, controller not started",
                    line, sensor.alias
                );
                report.failed.push(sensor.alias.clone());
                continue;
            }

            let restarted = match previous.get(sensor.id.as_str()) {
                Some(old) => {
                    if old.alias != sensor.alias {
                        self.publisher.retire(&old.alias).await;
                    }
                    true
                }
                None => false,
            };
            if !self.release(&sensor).await {
                report.failed.push(sensor.alias.clone());
                continue;
            }
            if restarted {
                report.restarted.push(sensor.alias.clone());
            } else {
                report.added.push(sensor.alias.clone());
            }
            self.spawn_controller(sensor, &next.control);
        }

        info!(
            "Configuration reloaded: {} added, {} removed, {} updated, {} restarted, {} failed",
            report.added.len(),
            report.removed.len(),
            report.updated.len(),
            report.restarted.len(),
            report.failed.len()
        );
        self.config.send_replace(Arc::new(next));
        Ok(report)
    }

    /// Stop every controller and wait for its actuators to be released.
    ///
    /// Controllers still running after the drain timeout are aborted and their
    /// actuators are forced off here. Calling `stop` again has no effect.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        match self.phase {
            SupervisorPhase::Stopped | SupervisorPhase::Draining => return Ok(()),
            SupervisorPhase::Created => {
                self.phase = SupervisorPhase::Stopped;
                return Ok(());
            }
            SupervisorPhase::Running => {}
        }

        info!("Stopping {} controller(s)", self.controllers.len());
        self.phase = SupervisorPhase::Draining;
        self.cancel.cancel();

        let deadline = Instant::now() + self.config().control.drain_timeout();
        let mut hung = Vec::new();
        let slots: Vec<ControllerSlot> = self.controllers.drain().map(|(_, s)| s).collect();
        for slot in slots {
            let alias = slot.sensor().alias.clone();
            if !self.stop_controller(slot, deadline).await {
                hung.push(alias);
            }
        }

        self.phase = SupervisorPhase::Stopped;
        if hung.is_empty() {
            info!("All controllers stopped");
            Ok(())
        } else {
            error!("Controllers aborted during drain: {}", hung.join(", "));
            Err(SupervisorError::DrainTimeout { sensors: hung })
        }
    }

    /// Handle an event sent by a controller
    pub async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Failed {
                sensor_id,
                alias,
                error,
            } => {
                error!(
                    "Controller for '{}' ({}) failed: {}. It will be restarted on the next reload",
                    alias, sensor_id, error
                );
                if let Some(slot) = self.controllers.remove(&sensor_id) {
                    // The task ends right after reporting
                    if let Err(e) = slot.handle.await {
                        error!("Controller task for '{}' panicked: {}", alias, e);
                    }
                }
            }
        }
    }

    fn expect_phase(
        &self,
        operation: &'static str,
        expected: SupervisorPhase,
    ) -> Result<(), SupervisorError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SupervisorError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Force the actuators of `sensor` off; `false` when the sensor must not start
    async fn release(&self, sensor: &SensorConfig) -> bool {
        match force_off(self.hardware.actuators.as_ref(), sensor).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Cannot release actuators of '{}', controller not started: {}",
                    sensor.alias, e
                );
                false
            }
        }
    }

    fn spawn_controller(&mut self, sensor: SensorConfig, control: &ControlConfig) {
        debug!("Spawning controller for '{}' ({})", sensor.alias, sensor.id);
        let id = sensor.id.clone();
        let (config, config_rx) = watch::channel(Arc::new(sensor));
        let cancel = self.cancel.child_token();
        let controller = SensorController::new(
            config_rx,
            self.hardware.clone(),
            self.publisher.clone(),
            control.poll_interval(),
            control.read_timeout(),
            cancel.clone(),
            self.events_tx.clone(),
        );
        let applied = controller.applied();
        let handle = controller.spawn();
        self.controllers.insert(
            id,
            ControllerSlot {
                config,
                applied,
                cancel,
                handle,
            },
        );
    }

    /// Cancel a controller and wait for it until `deadline`.
    ///
    /// Returns `false` when the controller had to be aborted.
    async fn stop_controller(&self, mut slot: ControllerSlot, deadline: Instant) -> bool {
        slot.cancel.cancel();
        match time::timeout_at(deadline, &mut slot.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                // A panicked controller may not have released its actuators
                let sensor = slot.sensor();
                error!("Controller for '{}' panicked: {}", sensor.alias, e);
                let _ = force_off(self.hardware.actuators.as_ref(), &sensor).await;
                true
            }
            Err(_) => {
                slot.handle.abort();
                let sensor = slot.sensor();
                warn!(
                    "Controller for '{}' did not stop in time, forcing its actuators off",
                    sensor.alias
                );
                if let Err(e) = force_off(self.hardware.actuators.as_ref(), &sensor).await {
                    error!("Failed to release actuators of '{}': {}", sensor.alias, e);
                }
                false
            }
        }
    }

    /// Forget controllers whose task has ended
    async fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .controllers
            .iter()
            .filter(|(_, slot)| slot.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            if let Some(slot) = self.controllers.remove(&id) {
                debug!("Reaping finished controller for {}", id);
                let _ = slot.handle.await;
            }
        }
    }
}

/// Wait until every controller giving up a line in `claimed` has released it.
///
/// Returns the lines still held when `deadline` passed.
async fn await_handovers(
    handovers: Vec<Handover>,
    claimed: &HashSet<u32>,
    deadline: Instant,
) -> HashSet<u32> {
    let mut held = HashSet::new();
    for mut handover in handovers {
        if !handover.lines.iter().any(|line| claimed.contains(line)) {
            continue;
        }
        let target = handover.target;
        // A closed channel means the controller stopped, after releasing its lines
        let released = time::timeout_at(
            deadline,
            handover.applied.wait_for(|c| Arc::ptr_eq(c, &target)),
        )
        .await
        .is_ok();
        if released {
            debug!("'{}' released GPIO {:?}", handover.alias, handover.lines);
        } else {
            warn!(
                "'{}' did not release GPIO {:?} in time",
                handover.alias, handover.lines
            );
            held.extend(handover.lines);
        }
    }
    held
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermal_regulation::{MockActuatorDriver, MockTemperatureSource};
    use std::path::Path;

    struct Fixed(Config);

    impl ConfigSource for Fixed {
        fn load(&self, _: &Path) -> anyhow::Result<Config> {
            Ok(self.0.clone())
        }
    }

    fn supervisor() -> Supervisor {
        let (publisher, _task) = StatePublisher::spawn(8);
        Supervisor::new(
            Arc::new(Fixed(Config::default())),
            "unused.yaml",
            Hardware::new(
                Arc::new(MockTemperatureSource::new()),
                Arc::new(MockActuatorDriver::new()),
            ),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_reload_before_start_is_rejected() {
        let mut supervisor = supervisor();
        assert!(matches!(
            supervisor.reload().await,
            Err(SupervisorError::InvalidPhase {
                phase: SupervisorPhase::Created,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut supervisor = supervisor();
        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.phase(), SupervisorPhase::Stopped);
        assert!(matches!(
            supervisor.start(Config::default()).await,
            Err(SupervisorError::InvalidPhase { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let mut supervisor = supervisor();
        assert!(supervisor.take_events().is_some());
        assert!(supervisor.take_events().is_none());
    }

    #[test]
    fn test_released_lines() {
        let actuator = |address| crate::config::ActuatorConfig {
            address,
            enabled: true,
            invert: false,
            min_cycle_minutes: 0.0,
        };
        let old = SensorConfig {
            id: "28-a".to_string(),
            alias: "a".to_string(),
            low_temp: 18.0,
            high_temp: 20.0,
            heat: actuator(17),
            cool: actuator(27),
            verbose: false,
        };
        let mut new = old.clone();
        new.cool = actuator(28);
        assert_eq!(released_lines(&old, &new), vec![27]);

        // Swapping lines between heating and cooling releases nothing
        new.heat = actuator(27);
        new.cool = actuator(17);
        assert!(released_lines(&old, &new).is_empty());

        new.heat.enabled = false;
        assert_eq!(released_lines(&old, &new), vec![27]);
    }

    #[test]
    fn test_drain_error_lists_sensors() {
        let err = SupervisorError::DrainTimeout {
            sensors: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().ends_with("a, b"));
    }
}
