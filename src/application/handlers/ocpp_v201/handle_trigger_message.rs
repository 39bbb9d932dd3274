//! V201 TriggerMessage handler

use rust_ocpp::v2_0_1::messages::trigger_message::{
    TriggerMessageRequest, TriggerMessageResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::application::station::{StationCommand, TriggerKind};
use crate::domain::OcppVersion;

fn reply(status: &str) -> Result<InboundReply, InboundError> {
    InboundReply::typed(&TriggerMessageResponse {
        status: reply_status("TriggerMessage", status)?,
        status_info: None,
    })
}

pub async fn handle_trigger_message(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: TriggerMessageRequest = parse_request(OcppVersion::V201, "TriggerMessage", payload)?;
    let requested = format!("{:?}", req.requested_message);
    let connector_id = req
        .evse
        .as_ref()
        .and_then(|e| u32::try_from(e.id).ok())
        .filter(|id| *id > 0);

    info!(
        station_id = %handler.station_id(),
        requested_message = requested.as_str(),
        ?connector_id,
        "V201 TriggerMessage"
    );

    let Some(message) = TriggerKind::parse(&requested) else {
        return reply("NotImplemented");
    };

    if let Some(id) = connector_id {
        if handler.core().ctx.charge_point.lock().await.connector(id).is_err() {
            return reply("Rejected");
        }
    }

    Ok(reply("Accepted")?.then(StationCommand::Trigger {
        message,
        connector_id,
    }))
}
