//! Outbound side of one station's CSMS link
//!
//! An [`OcppSession`] outlives individual sockets: the connection manager
//! attaches a fresh writer on every (re)connect and detaches it on loss.
//! Detaching fails every pending call with `Cancelled`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::connection::{Connection, OutboundMessage};
use super::pending::PendingCallRegistry;
use crate::domain::OcppVersion;
use crate::shared::{OcppError, OcppFrame};

pub struct OcppSession {
    station_id: String,
    version: OcppVersion,
    connection: RwLock<Option<Connection>>,
    pending: PendingCallRegistry,
    call_timeout: Duration,
    next_connection_id: AtomicU64,
}

impl OcppSession {
    pub fn new(station_id: impl Into<String>, version: OcppVersion, call_timeout: Duration) -> Self {
        let station_id = station_id.into();
        Self {
            pending: PendingCallRegistry::new(station_id.clone()),
            station_id,
            version,
            connection: RwLock::new(None),
            call_timeout,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn version(&self) -> OcppVersion {
        self.version
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn pending(&self) -> &PendingCallRegistry {
        &self.pending
    }

    /// Bind a new socket writer. Any previous one is dropped.
    pub async fn attach(&self, sender: mpsc::UnboundedSender<OutboundMessage>) -> u64 {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let connection = Connection::new(connection_id, &self.station_id, sender, self.version);
        let previous = self.connection.write().await.replace(connection);
        if previous.is_some() {
            warn!(station_id = %self.station_id, "Replaced a connection that was still attached");
        }
        debug!(station_id = %self.station_id, connection_id, "Connection attached");
        connection_id
    }

    /// Drop the writer and cancel every pending call.
    pub async fn detach(&self, reason: &str) -> bool {
        let had_connection = self.connection.write().await.take().is_some();
        self.pending.cancel_all(reason);
        if had_connection {
            debug!(station_id = %self.station_id, reason, "Connection detached");
        }
        had_connection
    }

    pub async fn is_attached(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .is_some_and(Connection::is_open)
    }

    async fn sender(&self) -> Result<mpsc::UnboundedSender<OutboundMessage>, OcppError> {
        self.connection
            .read()
            .await
            .as_ref()
            .filter(|c| c.is_open())
            .map(Connection::sender)
            .ok_or(OcppError::NotConnected)
    }

    /// Send a CALL and wait for its answer with the default timeout.
    pub async fn call(&self, action: &str, payload: Value) -> Result<Value, OcppError> {
        self.call_with_timeout(action, payload, self.call_timeout).await
    }

    pub async fn call_with_timeout(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, OcppError> {
        let sender = self.sender().await?;
        self.pending
            .call(action, payload, timeout, move |text| {
                sender
                    .send(OutboundMessage::Text(text))
                    .map_err(|_| OcppError::NotConnected)
            })
            .await
    }

    /// Write a response frame (CALLRESULT / CALLERROR).
    pub async fn send_frame(&self, frame: &OcppFrame) -> Result<(), OcppError> {
        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or(OcppError::NotConnected)?;
        connection.send(frame.serialize())
    }

    /// Ask the writer to send a close frame.
    pub async fn close(&self, code: u16, reason: &str) {
        if let Some(connection) = self.connection.read().await.as_ref() {
            connection.close(code, reason);
        }
    }

    /// Route a CALLRESULT / CALLERROR to its waiting caller.
    pub fn route_response(&self, frame: OcppFrame) -> bool {
        match frame {
            OcppFrame::CallResult {
                message_id,
                payload,
            } => self.pending.resolve(&message_id, payload),
            OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => self
                .pending
                .reject(&message_id, &error_code, &error_description, error_details),
            OcppFrame::Call { .. } => false,
        }
    }
}
