// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration for the status API web server

use serde::{Deserialize, Serialize};

/// Configuration for the status API web server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// Start the status API server
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// The TCP port the server will listen on.
    ///
    /// Valid range is 1-65534. Default value is 8080.
    #[serde(default = "default_port")]
    pub port: u16,

    /// The network address the server will bind to.
    ///
    /// Use "0.0.0.0" to bind to all IPv4 interfaces.
    #[serde(default = "default_address")]
    pub address: String,

    /// The server name reported in HTTP headers and logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// Base URL a browser uses to reach the server, handed to web clients
    #[serde(default)]
    pub base_url: String,

    /// Ask web clients to display temperatures in Fahrenheit
    #[serde(default)]
    pub display_fahrenheit: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_name() -> String {
    format!("ChamberThermostat/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
            address: default_address(),
            name: default_name(),
            base_url: String::new(),
            display_fahrenheit: false,
        }
    }
}
