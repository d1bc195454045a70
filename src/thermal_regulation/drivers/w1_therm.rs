// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! 1-wire temperature sensor driver
//!
//! Reads DS18B20 sensors exposed by the kernel `w1-therm` driver. Each sensor
//! is a directory under the devices path holding a `w1_slave` file:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line carries the CRC check, the second the temperature in
//! millidegrees Celsius.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::trace;

use crate::thermal_regulation::{SensorReadError, TemperatureSource};

/// Prefix of the bus master entries listed next to the sensors
const BUS_MASTER_PREFIX: &str = "w1_bus_master";

/// DS18B20 reader over sysfs
#[derive(Debug, Clone)]
pub struct W1ThermSource {
    devices_path: PathBuf,
}

impl W1ThermSource {
    pub fn new(devices_path: impl AsRef<Path>) -> Self {
        Self {
            devices_path: devices_path.as_ref().to_path_buf(),
        }
    }

    fn slave_path(&self, sensor_id: &str) -> PathBuf {
        self.devices_path.join(sensor_id).join("w1_slave")
    }
}

#[async_trait]
impl TemperatureSource for W1ThermSource {
    async fn read_temperature(&self, sensor_id: &str) -> Result<f64, SensorReadError> {
        let path = self.slave_path(sensor_id);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SensorReadError::NotFound(sensor_id.to_string()),
                _ => SensorReadError::Io {
                    sensor_id: sensor_id.to_string(),
                    source: e,
                },
            })?;
        trace!("{:?}: {:?}", path, contents);
        parse_w1_slave(sensor_id, &contents)
    }

    async fn list_sensors(&self) -> Result<Vec<String>, SensorReadError> {
        let io_error = |source| SensorReadError::Io {
            sensor_id: self.devices_path.display().to_string(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.devices_path)
            .await
            .map_err(io_error)?;

        let mut sensors = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(BUS_MASTER_PREFIX) {
                sensors.push(name);
            }
        }
        sensors.sort();
        Ok(sensors)
    }
}

/// Parse the content of a `w1_slave` file into degrees Celsius
pub fn parse_w1_slave(sensor_id: &str, contents: &str) -> Result<f64, SensorReadError> {
    let invalid = |reason: &str| SensorReadError::InvalidReading {
        sensor_id: sensor_id.to_string(),
        reason: reason.to_string(),
    };

    let mut lines = contents.lines();
    let crc_line = lines.next().ok_or_else(|| invalid("empty w1_slave file"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(invalid("CRC check failed"));
    }

    let data_line = lines.next().ok_or_else(|| invalid("missing data line"))?;
    let raw = data_line
        .rsplit_once("t=")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| invalid("missing temperature field"))?;
    let millidegrees: i64 = raw
        .parse()
        .map_err(|_| invalid(&format!("unparsable temperature '{}'", raw)))?;

    Ok(millidegrees as f64 / 1000.0)
}
