// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon launcher
//!
//! Wires the hardware, the state publisher, the supervisor and the observers
//! (status API, metrics sink, heartbeat) together, then reacts to process
//! signals: SIGHUP reloads the configuration, SIGTERM and SIGINT drain the
//! controllers before the observers are stopped.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::supervisor::Supervisor;
use crate::config::{Config, YamlConfigSource};
use crate::metrics::InfluxSink;
use crate::thermal_regulation::{create_hardware, ControllerEvent, Hardware, StatePublisher};
use crate::visualization::{build_rocket, figment_from_config};

/// Period of the heartbeat log line
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// How long `join` waits for each background task
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Represents a daemon task manager that coordinates the regulation and its observers
///
/// The daemon keeps a handle on every background task it spawns. The
/// controllers themselves belong to the [`Supervisor`].
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    cancel: CancellationToken,
    supervisor: Option<Supervisor>,
    events: Option<mpsc::UnboundedReceiver<ControllerEvent>>,
    publisher: Option<StatePublisher>,
    rocket_shutdown: Option<rocket::Shutdown>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
            supervisor: None,
            events: None,
            publisher: None,
            rocket_shutdown: None,
        }
    }

    /// Launch the regulation and every configured observer.
    ///
    /// `config_path` is where the configuration is read again on reload.
    pub async fn launch(&mut self, config: &Config, config_path: &Path) -> Result<()> {
        let hardware = create_hardware(config);
        self.launch_with_hardware(config, config_path, hardware).await
    }

    /// Launch with explicit hardware backends
    pub async fn launch_with_hardware(
        &mut self,
        config: &Config,
        config_path: &Path,
        hardware: Hardware,
    ) -> Result<()> {
        if self.supervisor.is_some() {
            anyhow::bail!("Daemon already launched");
        }
        let (publisher, _delivery) = StatePublisher::spawn(config.control.publish_capacity);

        let mut supervisor = Supervisor::new(
            Arc::new(YamlConfigSource),
            config_path,
            hardware,
            publisher.clone(),
        );
        self.events = supervisor.take_events();
        supervisor
            .start(config.clone())
            .await
            .context("Failed to start the sensor controllers")?;
        self.supervisor = Some(supervisor);
        self.publisher = Some(publisher.clone());

        // Controllers are running: any failure from here on must drain them
        if let Err(e) = self.start_observers(config, publisher).await {
            error!("Daemon launch failed, stopping controllers: {:#}", e);
            if let Err(stop_error) = self.shutdown().await {
                error!("{:#}", stop_error);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn start_observers(&mut self, config: &Config, publisher: StatePublisher) -> Result<()> {
        if config.visualization.enabled {
            let config_rx = match self.supervisor.as_ref() {
                Some(supervisor) => supervisor.subscribe_config(),
                None => anyhow::bail!("Daemon was not launched"),
            };
            self.start_visualization_server(config, config_rx, publisher.clone())
                .await?;
        }

        if config.influx.enabled {
            self.start_metrics_sink(config, &publisher)?;
        }

        self.start_heartbeat(publisher);
        Ok(())
    }

    /// Latest controller states, for embedding callers
    pub fn publisher(&self) -> Option<&StatePublisher> {
        self.publisher.as_ref()
    }

    /// Start the Rocket status API server
    async fn start_visualization_server(
        &mut self,
        config: &Config,
        config_rx: watch::Receiver<Arc<Config>>,
        publisher: StatePublisher,
    ) -> Result<()> {
        info!(
            "Starting web server on {}:{}",
            config.visualization.address, config.visualization.port
        );

        let figment = figment_from_config(config);
        let rocket = build_rocket(figment, publisher, config_rx);
        let ignited = rocket
            .ignite()
            .await
            .context("Failed to initialize the web server")?;
        self.rocket_shutdown = Some(ignited.shutdown());

        let task = tokio::spawn(async move {
            ignited.launch().await?;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start writing every published state to InfluxDB
    fn start_metrics_sink(&mut self, config: &Config, publisher: &StatePublisher) -> Result<()> {
        let sink = InfluxSink::new(&config.influx).context("Failed to create InfluxDB client")?;
        let feed = publisher.subscribe();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            sink.run(feed, cancel).await;
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs system status periodically
    fn start_heartbeat(&mut self, publisher: StatePublisher) {
        debug!("Starting heartbeat monitor");

        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(HEARTBEAT_PERIOD);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => debug!(
                        "Daemon heartbeat: {} controller state(s), {} update(s) dropped",
                        publisher.len(),
                        publisher.dropped()
                    ),
                }
            }
            Ok(())
        });

        self.tasks.push(task);
    }

    /// Reload the configuration through the supervisor
    pub async fn reload(&mut self) {
        let Some(supervisor) = self.supervisor.as_mut() else {
            return;
        };
        match supervisor.reload().await {
            Ok(report) => debug!("Reload report: {:?}", report),
            Err(e) => warn!("Configuration reload failed: {}", e),
        }
    }

    /// Serve signals and controller events until a termination signal arrives
    #[cfg(unix)]
    pub async fn run(&mut self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup =
            signal(SignalKind::hangup()).context("Failed to install the SIGHUP handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install the SIGTERM handler")?;
        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to install the SIGINT handler")?;
        let mut events = self.events.take().context("Daemon was not launched")?;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    self.reload().await;
                }
                _ = terminate.recv() => {
                    info!("SIGTERM received, terminating daemon");
                    break;
                }
                _ = interrupt.recv() => {
                    info!("SIGINT received, terminating daemon");
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
        Ok(())
    }

    /// Serve controller events until interrupted
    #[cfg(not(unix))]
    pub async fn run(&mut self) -> Result<()> {
        let mut events = self.events.take().context("Daemon was not launched")?;
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to wait for the interrupt signal")?;
                    info!("Interrupt received, terminating daemon");
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        if let Some(supervisor) = self.supervisor.as_mut() {
            supervisor.handle_event(event).await;
        }
    }

    /// Drain the controllers, then stop every background task.
    ///
    /// The observers are stopped even when some controllers had to be aborted;
    /// that failure is returned afterwards.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down daemon tasks");
        let drained = match self.supervisor.as_mut() {
            Some(supervisor) => supervisor.stop().await,
            None => Ok(()),
        };
        if let Some(publisher) = &self.publisher {
            publisher.flush().await;
        }

        self.cancel.cancel();
        if let Some(shutdown) = self.rocket_shutdown.take() {
            shutdown.notify();
        }
        drained.context("Controllers did not drain cleanly")
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {:#}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }
        Ok(())
    }
}
