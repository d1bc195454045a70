// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Read-only status API
//!
//! - `GET /ping`
//! - `GET /jsconfig.js`
//! - `GET /api/version`
//! - `GET /api/status` and `GET /api/status/<alias>`
//! - `GET /api/config/sensors` and `GET /api/config/sensors/<alias>`

use std::sync::Arc;

use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::{get, routes, Route, State};
use serde::Serialize;
use tokio::sync::watch;

use crate::config::{Config, SensorConfig};
use crate::thermal_regulation::{ControllerState, StatePublisher};

/// Configuration in effect, as seen by the API
pub struct ConfigView(pub watch::Receiver<Arc<Config>>);

impl ConfigView {
    pub fn current(&self) -> Arc<Config> {
        self.0.borrow().clone()
    }
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
}

#[get("/ping")]
pub fn ping() -> &'static str {
    "pong"
}

/// Display settings for a browser client
#[get("/jsconfig.js")]
pub fn jsconfig(config: &State<ConfigView>) -> (ContentType, String) {
    let visualization = config.current().visualization.clone();
    let base_url = serde_json::Value::from(visualization.base_url);
    (
        ContentType::JavaScript,
        format!(
            "var jsconfig={{baseurl:{},fahrenheit:{}}};",
            base_url, visualization.display_fahrenheit
        ),
    )
}

#[get("/version")]
pub fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[get("/status")]
pub fn get_all_status(publisher: &State<StatePublisher>) -> Json<Vec<ControllerState>> {
    Json(publisher.snapshot_all())
}

#[get("/status/<alias>")]
pub fn get_status(alias: &str, publisher: &State<StatePublisher>) -> Option<Json<ControllerState>> {
    publisher.snapshot(alias).map(Json)
}

#[get("/config/sensors")]
pub fn get_sensors(config: &State<ConfigView>) -> Json<Vec<SensorConfig>> {
    Json(config.current().sensors.clone())
}

#[get("/config/sensors/<alias>")]
pub fn get_sensor(alias: &str, config: &State<ConfigView>) -> Option<Json<SensorConfig>> {
    config.current().sensor_by_alias(alias).cloned().map(Json)
}

/// Routes mounted at the root
pub fn root_routes() -> Vec<Route> {
    routes![ping, jsconfig]
}

/// Routes mounted under `/api`
pub fn api_routes() -> Vec<Route> {
    routes![version, get_all_status, get_status, get_sensors, get_sensor]
}
