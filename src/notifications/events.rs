//! Station lifecycle events
//!
//! Every event carries the id of the station it came from, so the manager
//! can forward station streams into one channel without re-tagging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BootStatus, ConnectorStatus, MeterSample, OcppVersion, Transaction};

/// Event types emitted by simulated stations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Socket open and BootNotification accepted (or pending)
    #[serde(rename = "connected")]
    Connected(ConnectedEvent),
    /// Socket closed, locally or by the CSMS
    #[serde(rename = "disconnected")]
    Disconnected(DisconnectedEvent),
    /// A reconnect attempt is scheduled
    #[serde(rename = "reconnecting")]
    Reconnecting(ReconnectingEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
    #[serde(rename = "charging:started")]
    ChargingStarted(ChargingEvent),
    #[serde(rename = "charging:stopped")]
    ChargingStopped(ChargingEvent),
    #[serde(rename = "meter:values")]
    MeterValues(MeterValuesEvent),
    #[serde(rename = "connector:status")]
    ConnectorStatusChanged(ConnectorStatusChangedEvent),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatEvent),
}

impl Event {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Connected(_) => "connected",
            Event::Disconnected(_) => "disconnected",
            Event::Reconnecting(_) => "reconnecting",
            Event::Error(_) => "error",
            Event::ChargingStarted(_) => "charging:started",
            Event::ChargingStopped(_) => "charging:stopped",
            Event::MeterValues(_) => "meter:values",
            Event::ConnectorStatusChanged(_) => "connector:status",
            Event::Heartbeat(_) => "heartbeat",
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            Event::Connected(e) => &e.station_id,
            Event::Disconnected(e) => &e.station_id,
            Event::Reconnecting(e) => &e.station_id,
            Event::Error(e) => &e.station_id,
            Event::ChargingStarted(e) | Event::ChargingStopped(e) => &e.station_id,
            Event::MeterValues(e) => &e.station_id,
            Event::ConnectorStatusChanged(e) => &e.station_id,
            Event::Heartbeat(e) => &e.station_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    pub station_id: String,
    pub protocol: OcppVersion,
    pub boot_status: BootStatus,
    /// Heartbeat interval in effect (seconds)
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectedEvent {
    pub station_id: String,
    /// WebSocket close code (1006 when the socket died without a close frame)
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectingEvent {
    pub station_id: String,
    pub attempt: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub station_id: String,
    pub message: String,
    /// The station gave up and needs an explicit connect
    pub fatal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingEvent {
    pub station_id: String,
    pub connector_id: u32,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValuesEvent {
    pub station_id: String,
    pub connector_id: u32,
    pub transaction_id: i32,
    pub values: MeterSample,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorStatusChangedEvent {
    pub station_id: String,
    pub connector_id: u32,
    pub previous: ConnectorStatus,
    pub status: ConnectorStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEvent {
    pub station_id: String,
    /// CSMS time from the Heartbeat response
    pub timestamp: DateTime<Utc>,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
