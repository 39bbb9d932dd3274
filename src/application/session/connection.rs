//! WebSocket connection abstraction

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::OcppVersion;
use crate::shared::OcppError;

/// What the socket writer task should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

/// Write side of an open CSMS connection
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection instance
    pub connection_id: u64,
    pub station_id: String,
    sender: mpsc::UnboundedSender<OutboundMessage>,
    pub ocpp_version: OcppVersion,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        station_id: impl Into<String>,
        sender: mpsc::UnboundedSender<OutboundMessage>,
        ocpp_version: OcppVersion,
    ) -> Self {
        Self {
            connection_id,
            station_id: station_id.into(),
            sender,
            ocpp_version,
            connected_at: Utc::now(),
        }
    }

    /// Queue a text frame for the writer task
    pub fn send(&self, text: String) -> Result<(), OcppError> {
        self.sender
            .send(OutboundMessage::Text(text))
            .map_err(|_| OcppError::Connection("socket writer has stopped".to_string()))
    }

    /// Queue a close frame; the writer exits after sending it.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.sender.send(OutboundMessage::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.sender.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

// ── Tests ──────────────────────────────────────────────────────
