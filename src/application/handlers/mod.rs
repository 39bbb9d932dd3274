//! OCPP protocol handlers
//!
//! One [`ProtocolHandler`] per station, picked once by
//! [`create_protocol_handler`] from the configured version. A handler
//! knows how every station-side message is shaped on the wire and how
//! CSMS-initiated requests are answered. Version-independent behavior
//! lives in [`HandlerCore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::session::HeartbeatScheduler;
use crate::application::station::{StationCommand, StationContext};
use crate::domain::charging_profile::{
    ChargingProfile, ChargingProfileStore, ProfileCriteria, ProfileRejection,
};
use crate::domain::{
    BootOutcome, BootStatus, ConnectorStatus, MeterSample, OcppVersion, StopReason, Transaction,
};
use crate::shared::{OcppError, OcppFrame};

mod ocpp_v16;
mod ocpp_v16_handler;
mod ocpp_v201;
mod ocpp_v201_handler;

pub use ocpp_v16_handler::OcppHandlerV16;
pub use ocpp_v201_handler::OcppHandlerV201;

/// Shared handle to a station's protocol handler.
pub type SharedProtocolHandler = Arc<dyn ProtocolHandler>;

// ── Inbound results ────────────────────────────────────────────

/// CALLRESULT payload for an inbound request, plus the work to run once
/// the response is on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundReply {
    pub payload: Value,
    pub follow_up: Vec<StationCommand>,
}

impl InboundReply {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            follow_up: Vec::new(),
        }
    }

    /// Reply with a typed rust-ocpp response message.
    pub fn typed<T: Serialize>(response: &T) -> Result<Self, InboundError> {
        serde_json::to_value(response)
            .map(Self::new)
            .map_err(InboundError::internal)
    }

    pub fn then(mut self, command: StationCommand) -> Self {
        self.follow_up.push(command);
        self
    }

    pub fn then_all(mut self, commands: impl IntoIterator<Item = StationCommand>) -> Self {
        self.follow_up.extend(commands);
        self
    }
}

impl From<Value> for InboundReply {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}

/// CALLERROR answer for an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundError {
    pub code: String,
    pub description: String,
    pub details: Value,
}

impl InboundError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new("NotImplemented", format!("Action {action} is not supported"))
    }

    /// Payload that does not fit the action's schema. OCPP 1.6 and 2.0.1
    /// spell the code differently.
    pub fn format_violation(version: OcppVersion, action: &str, err: impl std::fmt::Display) -> Self {
        let code = match version {
            OcppVersion::V16 => "FormationViolation",
            OcppVersion::V201 => "FormatViolation",
        };
        Self::new(code, format!("Invalid {action} payload: {err}"))
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new("InternalError", err.to_string())
    }

    pub fn into_frame(self, message_id: impl Into<String>) -> OcppFrame {
        OcppFrame::CallError {
            message_id: message_id.into(),
            error_code: self.code,
            error_description: self.description,
            error_details: self.details,
        }
    }
}

/// Deserialize an inbound payload, mapping failures to the version's
/// format-violation code.
pub(crate) fn parse_request<T: DeserializeOwned>(
    version: OcppVersion,
    action: &str,
    payload: Value,
) -> Result<T, InboundError> {
    serde_json::from_value(payload).map_err(|e| {
        warn!(action, error = %e, "Rejecting malformed request");
        InboundError::format_violation(version, action, e)
    })
}

/// Response status enum for an answer whose status is decided by the
/// domain under its OCPP spelling.
pub(crate) fn reply_status<T: DeserializeOwned>(
    action: &str,
    status: &str,
) -> Result<T, InboundError> {
    wire_enum(action, status).map_err(InboundError::internal)
}

// ── Typed outbound messages ────────────────────────────────────

/// Send a typed request and decode the CSMS answer into its typed response.
pub(crate) async fn exchange<H, Req, Res>(
    handler: &H,
    action: &str,
    request: &Req,
) -> Result<Res, OcppError>
where
    H: ProtocolHandler + ?Sized,
    Req: Serialize + Sync,
    Res: DeserializeOwned,
{
    let payload =
        serde_json::to_value(request).map_err(|e| OcppError::invalid_payload(action, e))?;
    let response = handler.send_command(action, payload, None).await?;
    decode_response(action, response)
}

/// Decode a CALLRESULT payload. A payload that does not match the
/// action's schema is an error, never a silent default.
pub(crate) fn decode_response<T: DeserializeOwned>(
    action: &str,
    response: Value,
) -> Result<T, OcppError> {
    serde_json::from_value(response).map_err(|e| {
        warn!(action, error = %e, "Malformed response from CSMS");
        OcppError::invalid_payload(action, e)
    })
}

/// rust-ocpp enum for a domain value that already knows its OCPP spelling.
pub(crate) fn wire_enum<T: DeserializeOwned>(action: &str, value: &str) -> Result<T, OcppError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| OcppError::invalid_payload(action, format!("unsupported value {value}")))
}

/// Meter register (Wh) as the `int` OCPP carries on the wire.
pub(crate) fn meter_reading(wh: u64) -> i32 {
    i32::try_from(wh).unwrap_or(i32::MAX)
}

/// Answer to a transaction start report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAck {
    /// Transaction id assigned by the CSMS (OCPP 1.6 only)
    pub transaction_id: Option<i32>,
    /// Whether the CSMS accepted the id tag
    pub authorized: bool,
}

// ── ProtocolHandler ────────────────────────────────────────────

/// Version-specific half of a simulated station.
///
/// Connection setup and teardown belong to the connection manager; a
/// handler only runs over an attached session.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    fn version(&self) -> OcppVersion;

    fn core(&self) -> &HandlerCore;

    /// Send BootNotification and record the outcome. A `Rejected` status is
    /// returned as `Ok`; the caller decides what it means.
    async fn boot(&self) -> Result<BootOutcome, OcppError>;

    /// Answer one CSMS-initiated CALL. Must not wait on outbound calls.
    async fn handle_inbound_call(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<InboundReply, InboundError>;

    async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OcppError>;

    /// Authorize an id tag. `Ok(false)` means the CSMS refused it.
    async fn authorize(&self, id_tag: &str) -> Result<bool, OcppError>;

    async fn report_transaction_started(&self, tx: &Transaction) -> Result<StartAck, OcppError>;

    async fn report_transaction_stopped(&self, tx: &Transaction) -> Result<(), OcppError>;

    async fn report_meter_values(
        &self,
        tx: &Transaction,
        sample: &MeterSample,
    ) -> Result<(), OcppError>;

    /// Current meter sampling cadence (configurable by the CSMS).
    async fn meter_sample_interval(&self) -> Duration;

    /// Whether remote starts are authorized before the transaction begins.
    async fn authorize_remote_start(&self) -> bool;

    /// Whether a transaction whose id tag is refused at start is stopped.
    async fn stop_on_invalid_id(&self) -> bool;

    fn station_id(&self) -> &str {
        self.core().ctx.station_id()
    }

    /// Send an arbitrary CALL over the attached session.
    async fn send_command(
        &self,
        action: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, OcppError> {
        let session = &self.core().ctx.session;
        let timeout = timeout.unwrap_or_else(|| session.call_timeout());
        session.call_with_timeout(action, payload, timeout).await
    }

    async fn start_heartbeat(&self, interval: Duration, connection: &CancellationToken) {
        self.core().heartbeat.start(interval, connection).await;
    }

    async fn stop_heartbeat(&self) {
        self.core().heartbeat.stop().await;
    }
}

/// Build the handler for `version`.
pub fn create_protocol_handler(
    version: OcppVersion,
    ctx: Arc<StationContext>,
) -> SharedProtocolHandler {
    match version {
        OcppVersion::V16 => Arc::new(OcppHandlerV16::new(ctx)),
        OcppVersion::V201 => Arc::new(OcppHandlerV201::new(ctx)),
    }
}

// ── HandlerCore ────────────────────────────────────────────────

/// State and behavior both protocol versions share.
pub struct HandlerCore {
    pub ctx: Arc<StationContext>,
    pub heartbeat: HeartbeatScheduler,
    profiles: Mutex<ChargingProfileStore>,
    boot_status: Mutex<Option<BootStatus>>,
}

impl HandlerCore {
    pub fn new(ctx: Arc<StationContext>) -> Self {
        let heartbeat = HeartbeatScheduler::new(
            ctx.session.clone(),
            ctx.events.clone(),
            ctx.settings.max_missed_heartbeats,
        );
        Self {
            profiles: Mutex::new(ChargingProfileStore::new(ctx.config.connector_count)),
            heartbeat,
            ctx,
            boot_status: Mutex::new(None),
        }
    }

    pub async fn boot_status(&self) -> Option<BootStatus> {
        *self.boot_status.lock().await
    }

    pub(crate) async fn record_boot(&self, outcome: &BootOutcome) {
        *self.boot_status.lock().await = Some(outcome.status);
        info!(
            station_id = %self.ctx.station_id(),
            status = outcome.status.as_str(),
            interval = ?outcome.interval,
            "BootNotification answered"
        );
    }

    /// Check a remote start against connector state. Returns the start
    /// command to queue, or `None` when the request must be rejected.
    pub async fn accept_remote_start(
        &self,
        connector_id: Option<u32>,
        id_tag: &str,
        remote_start_id: Option<i32>,
    ) -> Option<StationCommand> {
        let cp = self.ctx.charge_point.lock().await;
        let connector_id = match connector_id {
            Some(0) | None => cp.first_available()?,
            Some(id) if cp.can_start(id) => id,
            Some(id) => {
                info!(
                    station_id = %self.ctx.station_id(),
                    connector_id = id,
                    "Remote start rejected, connector not available"
                );
                return None;
            }
        };
        Some(StationCommand::StartTransaction {
            connector_id,
            id_tag: id_tag.to_string(),
            remote_start_id,
        })
    }

    /// Find the connector running `transaction_id` and build the stop
    /// command for it.
    pub async fn accept_remote_stop(&self, transaction_id: i32) -> Option<StationCommand> {
        let connector_id = self
            .ctx
            .charge_point
            .lock()
            .await
            .find_transaction(transaction_id)?;
        Some(StationCommand::StopTransaction {
            connector_id,
            reason: StopReason::Remote,
        })
    }

    /// Apply ChangeAvailability locally. Returns whether the change was
    /// deferred and the status notifications to send.
    pub async fn change_availability(
        &self,
        connector_id: u32,
        operative: bool,
    ) -> Result<(bool, Vec<StationCommand>), OcppError> {
        let mut cp = self.ctx.charge_point.lock().await;
        let before: Vec<(u32, ConnectorStatus)> =
            cp.connectors().iter().map(|c| (c.id, c.status)).collect();
        let change = cp.change_availability(connector_id, operative)?;

        let commands = change
            .changed
            .iter()
            .map(|&(id, status)| StationCommand::StatusChanged {
                connector_id: id,
                previous: before
                    .iter()
                    .find(|(cid, _)| *cid == id)
                    .map(|(_, s)| *s)
                    .unwrap_or_default(),
                status,
            })
            .collect();
        Ok((change.scheduled, commands))
    }

    /// UnlockConnector: a running transaction on the connector is stopped.
    pub async fn unlock_connector(
        &self,
        connector_id: u32,
    ) -> Result<Option<StationCommand>, OcppError> {
        let cp = self.ctx.charge_point.lock().await;
        let connector = cp.connector(connector_id)?;
        Ok(connector
            .active_transaction
            .as_ref()
            .map(|_| StationCommand::StopTransaction {
                connector_id,
                reason: StopReason::UnlockCommand,
            }))
    }

    pub async fn has_active_transactions(&self) -> bool {
        !self.ctx.charge_point.lock().await.active_connectors().is_empty()
    }

    pub async fn install_profile(&self, profile: ChargingProfile) -> Result<(), ProfileRejection> {
        let profile_id = profile.profile_id;
        let result = self.profiles.lock().await.install(profile);
        match &result {
            Ok(()) => info!(station_id = %self.ctx.station_id(), profile_id, "Charging profile installed"),
            Err(reason) => warn!(
                station_id = %self.ctx.station_id(),
                profile_id,
                ?reason,
                "Charging profile rejected"
            ),
        }
        result
    }

    pub async fn clear_profiles(&self, criteria: &ProfileCriteria) -> usize {
        self.profiles.lock().await.clear(criteria)
    }

    pub async fn effective_profile(&self, connector_id: u32) -> Option<ChargingProfile> {
        self.profiles.lock().await.effective_for(connector_id).cloned()
    }

    pub async fn max_stack_level(&self) -> i32 {
        self.profiles.lock().await.max_stack_level()
    }

    /// Error code to report with a connector status.
    pub async fn error_code(&self, connector_id: u32) -> String {
        self.ctx
            .charge_point
            .lock()
            .await
            .connector(connector_id)
            .map(|c| c.error_code.clone())
            .unwrap_or_else(|_| "NoError".to_string())
    }

    /// Take the next TransactionEvent sequence number of a running
    /// transaction. Closed transactions keep the counter they ended with.
    pub async fn next_seq_no(&self, tx: &Transaction) -> u32 {
        if !tx.is_active() {
            return tx.seq_no;
        }
        let mut cp = self.ctx.charge_point.lock().await;
        match cp.transaction_mut(tx.connector_id) {
            Ok(stored) if stored.transaction_id == tx.transaction_id => stored.next_seq_no(),
            _ => tx.seq_no,
        }
    }
}
