// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Status API tests against a local Rocket client

use std::sync::Arc;

use chamber_thermostat::config::{ActuatorConfig, Config, SensorConfig};
use chamber_thermostat::thermal_regulation::{ControllerState, DwellState, StatePublisher};
use chamber_thermostat::visualization::{build_rocket, figment_from_config};
use chrono::Utc;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use serde_json::Value;
use tokio::sync::watch;

fn config() -> Config {
    let mut config = Config::default();
    config.visualization.base_url = "/thermostat".to_string();
    config.visualization.display_fahrenheit = true;
    config.sensors.push(SensorConfig {
        id: "28-000008e2ef58".to_string(),
        alias: "fermenter".to_string(),
        low_temp: 18.0,
        high_temp: 20.0,
        heat: ActuatorConfig {
            address: 17,
            enabled: true,
            invert: false,
            min_cycle_minutes: 5.0,
        },
        cool: ActuatorConfig::default(),
        verbose: false,
    });
    config
}

async fn client() -> (Client, StatePublisher, watch::Sender<Arc<Config>>) {
    let config = config();
    let (publisher, _task) = StatePublisher::spawn(8);
    let (config_tx, config_rx) = watch::channel(Arc::new(config.clone()));
    let figment = figment_from_config(&config).merge(("port", 0));
    let client = Client::tracked(build_rocket(figment, publisher.clone(), config_rx))
        .await
        .expect("valid rocket instance");
    (client, publisher, config_tx)
}

#[rocket::async_test]
async fn test_status_endpoints() {
    let (client, publisher, _config) = client().await;

    let response = client.get("/api/status").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body, Value::Array(vec![]));

    let now = Utc::now();
    publisher.publish(ControllerState {
        sensor_id: "28-000008e2ef58".to_string(),
        alias: "fermenter".to_string(),
        temperature: 17.5,
        heating: true,
        cooling: false,
        last_reading_at: now,
        last_changed_at: now,
        dwell: DwellState::Idle,
    });
    publisher.flush().await;

    let response = client.get("/api/status/fermenter").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::JSON));
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["temperature"], 17.5);
    assert_eq!(body["heating"], true);

    let response = client.get("/api/status/kegerator").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}

#[rocket::async_test]
async fn test_config_endpoints_follow_reloads() {
    let (client, _publisher, config_tx) = client().await;

    let response = client.get("/api/config/sensors/fermenter").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["heat"]["address"], 17);
    assert_eq!(body["low_temp"], 18.0);

    let mut next = config();
    next.sensors[0].alias = "lager".to_string();
    config_tx.send_replace(Arc::new(next));

    let response = client.get("/api/config/sensors/fermenter").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let response = client.get("/api/config/sensors").dispatch().await;
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body[0]["alias"], "lager");
}

#[rocket::async_test]
async fn test_jsconfig_and_version() {
    let (client, _publisher, _config) = client().await;

    let response = client.get("/jsconfig.js").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::JavaScript));
    assert_eq!(
        response.into_string().await.unwrap(),
        "var jsconfig={baseurl:\"/thermostat\",fahrenheit:true};"
    );

    let response = client.get("/api/version").dispatch().await;
    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
