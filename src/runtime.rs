//! Simulator runtime
//!
//! [`SimulatorHandle`] wraps the process lifecycle: build the station
//! manager from the config, create every station, connect them, and tear
//! everything down on shutdown. The CLI is a thin layer over it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::station::{ConnectParams, StationManager};
use crate::config::{AppConfig, ConfigError, LoggingConfig, SimulatorSettings};
use crate::domain::StationError;
use crate::notifications::EventSubscriber;
use crate::shared::shutdown::ShutdownCoordinator;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Station(#[from] StationError),
}

// ── Options ────────────────────────────────────────────────────────

pub struct SimulatorOptions {
    pub config: AppConfig,
    /// Connect every station right after creating it (default: true).
    pub connect: bool,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            connect: true,
        }
    }
}

/// Outcome of the initial connect round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectSummary {
    pub connected: usize,
    pub failed: usize,
}

// ── SimulatorHandle ────────────────────────────────────────────────

pub struct SimulatorHandle {
    manager: Arc<StationManager>,
    shutdown: ShutdownCoordinator,
    summary: ConnectSummary,
}

impl SimulatorHandle {
    /// Create every configured station and, unless disabled, connect them
    /// concurrently. A station that fails to connect stays registered in
    /// `disconnected` state; only configuration errors abort the start.
    pub async fn start(options: SimulatorOptions) -> Result<Self, RuntimeError> {
        let SimulatorOptions { config, connect } = options;
        let stations = config.station_configs()?;

        let manager = Arc::new(StationManager::new(SimulatorSettings::from(
            &config.simulator,
        )));
        for station in stations {
            manager.create_station(station)?;
        }
        info!(count = manager.count(), "🏭 Stations created");

        let summary = if connect {
            connect_all(&manager).await
        } else {
            ConnectSummary::default()
        };

        Ok(Self {
            manager,
            shutdown: ShutdownCoordinator::new(SHUTDOWN_TIMEOUT),
            summary,
        })
    }

    pub fn manager(&self) -> &Arc<StationManager> {
        &self.manager
    }

    pub fn connect_summary(&self) -> ConnectSummary {
        self.summary
    }

    /// Events of every station.
    pub fn subscribe(&self) -> EventSubscriber {
        self.manager.subscribe()
    }

    /// Cancel on SIGINT / SIGTERM.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the shutdown trigger, then disconnect and remove every
    /// station. Returns `false` if cleanup timed out.
    pub async fn wait(self) -> bool {
        let manager = self.manager.clone();
        self.shutdown
            .shutdown_with_cleanup(|| async move { manager.close().await })
            .await
    }

    pub async fn shutdown(self) -> bool {
        info!("🛑 Shutting down simulator...");
        self.trigger_shutdown();
        self.wait().await
    }
}

async fn connect_all(manager: &StationManager) -> ConnectSummary {
    let ids: Vec<String> = manager
        .list_stations()
        .await
        .into_iter()
        .map(|s| s.id)
        .collect();

    let results = join_all(
        ids.iter()
            .map(|id| manager.connect_station(id, ConnectParams::default())),
    )
    .await;

    let mut summary = ConnectSummary::default();
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(outcome) => {
                summary.connected += 1;
                info!(station_id = %id, boot_status = ?outcome.status, "Station online");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(station_id = %id, error = %e, "Station failed to connect");
            }
        }
    }
    info!(
        connected = summary.connected,
        failed = summary.failed,
        "Initial connect finished"
    );
    summary
}

/// Initialize tracing from the logging config.
///
/// `RUST_LOG` wins over the configured level. Call once at process startup.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    match config.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
