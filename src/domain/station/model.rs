//! Simulated station configuration and snapshot types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::domain::charge_point::Connector;
use crate::domain::error::StationError;
use crate::domain::ocpp::OcppVersion;

fn default_vendor() -> String {
    "OcppSim".to_string()
}

fn default_model() -> String {
    "SimStation".to_string()
}

fn default_connector_count() -> u32 {
    1
}

fn default_max_power() -> f64 {
    22_000.0
}

/// Static configuration of one simulated station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    /// Charge point identity, appended to the CSMS URL
    #[serde(alias = "id")]
    #[validate(length(min = 1, max = 48, message = "stationId must be 1..=48 characters"))]
    pub station_id: String,

    #[serde(default = "default_vendor")]
    #[validate(length(min = 1, max = 50))]
    pub vendor: String,

    #[serde(default = "default_model")]
    #[validate(length(min = 1, max = 50))]
    pub model: String,

    #[serde(default)]
    #[validate(length(max = 25))]
    pub serial_number: Option<String>,

    #[serde(default)]
    #[validate(length(max = 50))]
    pub firmware_version: Option<String>,

    #[serde(alias = "protocolVersion")]
    pub ocpp_version: OcppVersion,

    #[serde(default = "default_connector_count")]
    #[validate(range(min = 1, max = 64, message = "connectorCount must be between 1 and 64"))]
    pub connector_count: u32,

    /// Maximum station power (W), shared by all connectors
    #[serde(default = "default_max_power")]
    #[validate(range(min = 0.0))]
    pub max_power: f64,

    #[validate(length(min = 1, message = "csmsUrl is required"))]
    pub csms_url: String,

    /// Heartbeat interval override (seconds) used until the CSMS sends one
    #[serde(default, alias = "heartbeatIntervalSeconds")]
    pub heartbeat_interval: Option<u64>,
}

impl StationConfig {
    pub fn new(
        station_id: impl Into<String>,
        ocpp_version: OcppVersion,
        csms_url: impl Into<String>,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            vendor: default_vendor(),
            model: default_model(),
            serial_number: None,
            firmware_version: None,
            ocpp_version,
            connector_count: default_connector_count(),
            max_power: default_max_power(),
            csms_url: csms_url.into(),
            heartbeat_interval: None,
        }
    }

    pub fn with_connectors(mut self, count: u32) -> Self {
        self.connector_count = count;
        self
    }

    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval = Some(secs);
        self
    }

    pub fn with_max_power(mut self, watts: f64) -> Self {
        self.max_power = watts;
        self
    }

    /// Parse a loosely-typed JSON configuration, mapping missing or
    /// mistyped fields to [`StationError::InvalidConfig`].
    pub fn from_json(value: Value) -> Result<Self, StationError> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| StationError::InvalidConfig(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation plus the URL scheme check.
    pub fn check(&self) -> Result<(), StationError> {
        self.validate()
            .map_err(|e| StationError::InvalidConfig(e.to_string()))?;

        if !(self.csms_url.starts_with("ws://") || self.csms_url.starts_with("wss://")) {
            return Err(StationError::InvalidConfig(format!(
                "csmsUrl must use ws:// or wss://, got '{}'",
                self.csms_url
            )));
        }
        Ok(())
    }

    /// Power available to one connector when all of them charge.
    pub fn power_per_connector(&self) -> f64 {
        self.max_power / f64::from(self.connector_count.max(1))
    }
}

/// Externally visible station status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link lost, waiting for the next reconnect attempt
    Reconnecting,
    Error,
}

/// BootNotification registration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootStatus {
    Accepted,
    Pending,
    Rejected,
}

impl BootStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Accepted" => Some(Self::Accepted),
            "Pending" => Some(Self::Pending),
            "Rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Pending => "Pending",
            Self::Rejected => "Rejected",
        }
    }
}

/// Outcome of a BootNotification exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootOutcome {
    pub status: BootStatus,
    /// Heartbeat interval requested by the CSMS (seconds)
    pub interval: Option<u64>,
    pub current_time: Option<DateTime<Utc>>,
}

/// Point-in-time copy of a station, handed out by the manager.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub id: String,
    pub protocol_version: OcppVersion,
    pub status: StationStatus,
    pub boot_status: Option<BootStatus>,
    pub connectors: Vec<Connector>,
    pub config: StationConfig,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
