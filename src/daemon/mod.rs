// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! The daemon module runs the thermostat as a long-lived service: the
//! [`Supervisor`] owns the per-sensor controllers, and the [`Daemon`] adds the
//! observers (status API, metrics sink, heartbeat) and the signal handling.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use chamber_thermostat::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let path = Path::new("config.yaml");
//!     let config = Config::from_file(path)?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config, path).await?;
//!
//!     // Returns on SIGTERM or Ctrl+C, reloads on SIGHUP
//!     daemon.run().await?;
//!
//!     daemon.shutdown().await?;
//!     daemon.join().await?;
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;
pub mod supervisor;

pub use launch_daemon::Daemon;
pub use supervisor::{ReloadReport, Supervisor, SupervisorError, SupervisorPhase};
