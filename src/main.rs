// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the chamber thermostat daemon
use anyhow::Result;
use chamber_thermostat::config::{self, Config};
use chamber_thermostat::daemon::Daemon;
use chamber_thermostat::thermal_regulation::create_hardware;
use clap::Parser;
use log::{error, info};

use std::path::PathBuf;

/// Hysteresis thermostat for fermentation chambers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// List the temperature sensors found by the configured hardware backend and exit
    #[arg(long = "list-sensors", default_value_t = false)]
    list_sensors: bool,

    /// Web server port, overrides the configuration file
    #[arg(short = 'p', long)]
    web_port: Option<u16>,

    /// Web server address, overrides the configuration file
    #[arg(long)]
    web_address: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[rocket::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {:#}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("Cannot load configuration: {:#}", err);
            if !args.config.exists() {
                Config::create_sample_config(&args.config)?;
            }
            return Err(err);
        }
    };
    config.apply_args(args.web_port, args.web_address.clone());

    if args.list_sensors {
        let hardware = create_hardware(&config);
        let sensors = hardware.sensors.list_sensors().await?;
        println!("Available temperature sensors:");
        for id in sensors {
            let alias = config
                .sensors
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.alias.as_str())
                .unwrap_or("-");
            println!("- {} ({})", id, alias);
        }
        return Ok(());
    }

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(&config, &args.config).await?;

    let served = daemon.run().await;
    let drained = daemon.shutdown().await;
    daemon.join().await?;

    served?;
    drained
}
