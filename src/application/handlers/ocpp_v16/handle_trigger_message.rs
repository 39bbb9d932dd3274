//! TriggerMessage handler

use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::{MessageTrigger, TriggerMessageStatus};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::application::station::{StationCommand, TriggerKind};
use crate::domain::OcppVersion;

pub async fn handle_trigger_message(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: TriggerMessageRequest = parse_request(OcppVersion::V16, "TriggerMessage", payload)?;

    info!(
        station_id = %handler.station_id(),
        requested_message = ?req.requested_message,
        connector_id = ?req.connector_id,
        "TriggerMessage"
    );

    let message = match req.requested_message {
        MessageTrigger::BootNotification => TriggerKind::BootNotification,
        MessageTrigger::Heartbeat => TriggerKind::Heartbeat,
        MessageTrigger::StatusNotification => TriggerKind::StatusNotification,
        MessageTrigger::MeterValues => TriggerKind::MeterValues,
        MessageTrigger::DiagnosticsStatusNotification
        | MessageTrigger::FirmwareStatusNotification => {
            return reply(TriggerMessageStatus::NotImplemented);
        }
    };

    if let Some(connector_id) = req.connector_id.filter(|id| *id > 0) {
        if handler
            .core()
            .ctx
            .charge_point
            .lock()
            .await
            .connector(connector_id)
            .is_err()
        {
            return reply(TriggerMessageStatus::Rejected);
        }
    }

    Ok(reply(TriggerMessageStatus::Accepted)?.then(StationCommand::Trigger {
        message,
        connector_id: req.connector_id.filter(|id| *id > 0),
    }))
}

fn reply(status: TriggerMessageStatus) -> Result<InboundReply, InboundError> {
    InboundReply::typed(&TriggerMessageResponse { status })
}
