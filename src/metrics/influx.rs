// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB 1.x writer
//!
//! Every state applied by the publisher becomes one point of the
//! `temperature` measurement, tagged with the sensor alias:
//!
//! ```text
//! temperature,alias=kegerator value=6.125,heating=f,cooling=t 1718000000
//! ```
//!
//! Writes that fail are logged and dropped, regulation never waits on the sink.

use log::{debug, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::config::InfluxConfig;
use crate::thermal_regulation::ControllerState;

/// Measurement name of every point
pub const MEASUREMENT: &str = "temperature";

/// Error type for metrics delivery failures
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The HTTP client could not be built or the request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status code
    #[error("InfluxDB returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Line protocol writer for one database
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;
        Ok(Self {
            client,
            write_url: format!("{}/write", config.addr.trim_end_matches('/')),
            config: config.clone(),
        })
    }

    /// Write one state
    pub async fn write(&self, state: &ControllerState) -> Result<(), MetricsError> {
        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.config.database.as_str()), ("precision", "s")])
            .body(line_protocol(state));
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(MetricsError::HttpStatus {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Write every state received from `feed` until `cancel` fires
    pub async fn run(
        self,
        mut feed: broadcast::Receiver<ControllerState>,
        cancel: CancellationToken,
    ) {
        info!(
            "Writing controller states to InfluxDB database '{}' at {}",
            self.config.database, self.config.addr
        );
        loop {
            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = feed.recv() => match received {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Metrics sink lagging, skipped {} state(s)", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if let Err(e) = self.write(&state).await {
                warn!("Failed to write '{}' to InfluxDB: {}", state.alias, e);
            }
        }
        debug!("Metrics sink stopped");
    }
}

/// Encode a state as an InfluxDB line
pub fn line_protocol(state: &ControllerState) -> String {
    format!(
        "{},alias={} value={},heating={},cooling={} {}",
        MEASUREMENT,
        escape_tag(&state.alias),
        state.temperature,
        bool_field(state.heating),
        bool_field(state.cooling),
        state.last_reading_at.timestamp()
    )
}

fn bool_field(value: bool) -> &'static str {
    if value {
        "t"
    } else {
        "f"
    }
}

/// Escape commas, equal signs and spaces in a tag value
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn state(alias: &str) -> ControllerState {
        let at = Utc.with_ymd_and_hms(2024, 6, 10, 6, 13, 20).unwrap();
        ControllerState {
            sensor_id: "28-000008e2ef58".to_string(),
            alias: alias.to_string(),
            temperature: 6.125,
            heating: false,
            cooling: true,
            last_reading_at: at,
            last_changed_at: at,
            dwell: Default::default(),
        }
    }

    #[test]
    fn test_line_protocol() {
        assert_eq!(
            line_protocol(&state("kegerator")),
            "temperature,alias=kegerator value=6.125,heating=f,cooling=t 1718000000"
        );
    }

    #[test]
    fn test_tag_escaping() {
        let line = line_protocol(&state("beer fridge,left=1"));
        assert!(line.starts_with("temperature,alias=beer\\ fridge\\,left\\=1 value="));
    }

    #[test]
    fn test_write_url() {
        let config = InfluxConfig {
            addr: "http://influx:8086/".to_string(),
            database: "chamber".to_string(),
            ..InfluxConfig::default()
        };
        let sink = InfluxSink::new(&config).unwrap();
        assert_eq!(sink.write_url, "http://influx:8086/write");
    }
}
