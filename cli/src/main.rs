//! OCPP station simulator CLI
//!
//! Starts every station from the config file and keeps them online until
//! Ctrl+C / SIGTERM.
//!
//! ```sh
//! # Default config (~/.config/ocpp-sim/config.toml)
//! ocpp-sim
//!
//! # Custom config path
//! ocpp-sim --config ./stations.toml
//!
//! # Validate config without starting
//! ocpp-sim --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};

use ocpp_sim::config::AppConfig;
use ocpp_sim::runtime::{init_tracing, SimulatorHandle, SimulatorOptions};
use ocpp_sim::{Event, EventSubscriber};

/// Simulated OCPP 1.6J / 2.0.1 charging stations.
#[derive(Parser, Debug)]
#[command(
    name = "ocpp-sim",
    version,
    about = "Simulated EV charging stations for testing an OCPP CSMS",
    long_about = "Runs the charging stations described in a TOML file against a CSMS \
                  over OCPP 1.6J or 2.0.1.\n\n\
                  Default config: ~/.config/ocpp-sim/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    /// Create the stations but do not connect them.
    #[arg(long)]
    no_connect: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ────────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(ocpp_sim::default_config_path);

    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config.logging);

    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) if cli.check => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            return Err(e.into());
        }
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            warn!("Using default configuration (no stations).");
        }
    }

    // ── Config validation mode ────────────────────────────────────
    if cli.check {
        let stations = config.station_configs()?;
        println!("✅ Configuration is valid");
        println!("   Config file : {}", config_path.display());
        println!("   Stations    : {}", stations.len());
        for station in &stations {
            println!(
                "     {} ({}, {} connectors) -> {}",
                station.station_id,
                station.ocpp_version,
                station.connector_count,
                station.csms_url
            );
        }
        println!("   Log level   : {}", config.logging.level);
        return Ok(());
    }

    // ── Start simulator ───────────────────────────────────────────
    let handle = SimulatorHandle::start(SimulatorOptions {
        config,
        connect: !cli.no_connect,
    })
    .await?;

    tokio::spawn(log_events(handle.subscribe()));
    handle.install_signal_handler();

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    if !handle.wait().await {
        warn!("Some stations did not shut down cleanly");
    }

    Ok(())
}

async fn log_events(mut events: EventSubscriber) {
    while let Some(msg) = events.recv().await {
        let data = serde_json::to_string(&msg).unwrap_or_default();
        match &msg.event {
            Event::Error(e) if e.fatal => {
                error!(station_id = %e.station_id, event = msg.event.event_type(), %data, "Station event")
            }
            Event::Error(_) | Event::Disconnected(_) | Event::Reconnecting(_) => {
                warn!(station_id = %msg.event.station_id(), event = msg.event.event_type(), %data, "Station event")
            }
            _ => info!(station_id = %msg.event.station_id(), event = msg.event.event_type(), %data, "Station event"),
        }
    }
}
