// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! GPIO actuator driver using the sysfs interface
//!
//! A line is exported through `<gpio_path>/export` the first time it is driven
//! and configured as an output, then its level is written to
//! `<gpio_path>/gpio<N>/value`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use crate::thermal_regulation::{ActuationError, ActuatorDriver};

/// Relay driver over `/sys/class/gpio`
#[derive(Debug)]
pub struct SysfsGpioDriver {
    gpio_path: PathBuf,
    /// Lines already exported and set as outputs
    configured: Mutex<HashSet<u32>>,
}

impl SysfsGpioDriver {
    pub fn new(gpio_path: impl AsRef<Path>) -> Self {
        Self {
            gpio_path: gpio_path.as_ref().to_path_buf(),
            configured: Mutex::new(HashSet::new()),
        }
    }

    fn line_path(&self, address: u32) -> PathBuf {
        self.gpio_path.join(format!("gpio{}", address))
    }

    async fn configure_output(&self, address: u32, high: bool) -> Result<(), ActuationError> {
        let mut configured = self.configured.lock().await;
        if configured.contains(&address) {
            return Ok(());
        }

        let fail = |what: &str, e: std::io::Error| {
            ActuationError::new(address, high, format!("{}: {}", what, e))
        };

        let line = self.line_path(address);
        if tokio::fs::metadata(&line).await.is_err() {
            debug!("Exporting GPIO {}", address);
            tokio::fs::write(self.gpio_path.join("export"), address.to_string())
                .await
                .map_err(|e| fail("export failed", e))?;
        }
        tokio::fs::write(line.join("direction"), "out")
            .await
            .map_err(|e| fail("setting direction failed", e))?;

        configured.insert(address);
        Ok(())
    }
}

#[async_trait]
impl ActuatorDriver for SysfsGpioDriver {
    async fn set_level(&self, address: u32, high: bool) -> Result<(), ActuationError> {
        self.configure_output(address, high).await?;
        let value = if high { "1" } else { "0" };
        tokio::fs::write(self.line_path(address).join("value"), value)
            .await
            .map_err(|e| ActuationError::new(address, high, format!("write failed: {}", e)))
    }
}
