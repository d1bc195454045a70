// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration for the InfluxDB metrics sink

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// InfluxDB 1.x connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Write every published state to InfluxDB
    #[serde(default)]
    pub enabled: bool,

    /// Server URL, e.g. `http://influx:8086`
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Target database
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// User-Agent header sent with every write
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Accept invalid TLS certificates
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_addr() -> String {
    "http://influx:8086".to_string()
}

fn default_user_agent() -> String {
    "InfluxDBClient".to_string()
}

fn default_timeout_secs() -> f64 {
    30.0
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_addr(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            insecure_skip_verify: false,
        }
    }
}

impl InfluxConfig {
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs.is_finite() && self.timeout_secs > 0.0 {
            Duration::from_secs_f64(self.timeout_secs)
        } else {
            Duration::from_secs_f64(default_timeout_secs())
        }
    }
}
