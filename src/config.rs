//! Configuration module
//!
//! [`AppConfig`] is the TOML file layout. [`SimulatorSettings`] is the
//! runtime form handed to stations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::StationConfig;
use crate::shared::ReconnectPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid station '{station_id}': {message}")]
    InvalidStation { station_id: String, message: String },
}

/// Default config location: `<config_dir>/ocpp-sim/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-sim")
        .join("config.toml")
}

// ── File layout ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error (or a full EnvFilter directive)
    pub level: String,
    /// `plain` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub call_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub default_heartbeat_interval_secs: u64,
    pub meter_sample_interval_secs: u64,
    /// Consecutive heartbeat timeouts treated as a dead socket (0 = never)
    pub max_missed_heartbeats: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            connect_timeout_secs: 10,
            reconnect_base_delay_ms: 5_000,
            reconnect_max_delay_ms: 60_000,
            max_reconnect_attempts: 5,
            default_heartbeat_interval_secs: 60,
            meter_sample_interval_secs: 60,
            max_missed_heartbeats: 3,
        }
    }
}

/// A `[[stations]]` entry. `replicas > 1` expands into `<id>-<n>` stations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationEntry {
    #[serde(flatten)]
    pub station: StationConfig,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub simulator: SimulatorConfig,
    pub stations: Vec<StationEntry>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every configured station with replicas expanded and validated.
    pub fn station_configs(&self) -> Result<Vec<StationConfig>, ConfigError> {
        let mut out = Vec::new();
        for entry in &self.stations {
            let replicas = entry.replicas.max(1);
            for n in 1..=replicas {
                let mut station = entry.station.clone();
                if replicas > 1 {
                    station.station_id = format!("{}-{}", entry.station.station_id, n);
                }
                station
                    .check()
                    .map_err(|e| ConfigError::InvalidStation {
                        station_id: station.station_id.clone(),
                        message: e.to_string(),
                    })?;
                out.push(station);
            }
        }
        Ok(out)
    }
}

// ── Runtime settings ───────────────────────────────────────────────

/// Timing knobs shared by every station of a manager.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub default_heartbeat_interval: Duration,
    pub meter_sample_interval: Duration,
    pub max_missed_heartbeats: u32,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self::from(&SimulatorConfig::default())
    }
}

impl From<&SimulatorConfig> for SimulatorSettings {
    fn from(cfg: &SimulatorConfig) -> Self {
        Self {
            call_timeout: Duration::from_secs(cfg.call_timeout_secs),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            reconnect: ReconnectPolicy::new(
                Duration::from_millis(cfg.reconnect_base_delay_ms),
                cfg.max_reconnect_attempts,
            )
            .with_max_delay(Duration::from_millis(cfg.reconnect_max_delay_ms)),
            default_heartbeat_interval: Duration::from_secs(cfg.default_heartbeat_interval_secs),
            meter_sample_interval: Duration::from_secs(cfg.meter_sample_interval_secs),
            max_missed_heartbeats: cfg.max_missed_heartbeats,
        }
    }
}
