//! V201 UnlockConnector handler

use rust_ocpp::v2_0_1::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::OcppVersion;

pub async fn handle_unlock_connector(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: UnlockConnectorRequest =
        parse_request(OcppVersion::V201, "UnlockConnector", payload)?;

    info!(
        station_id = %handler.station_id(),
        evse_id = req.evse_id,
        connector_id = req.connector_id,
        "V201 UnlockConnector"
    );

    // Every EVSE carries a single connector, numbered 1
    let unlocked = match u32::try_from(req.evse_id) {
        Ok(evse_id) if req.connector_id == 1 => handler.core().unlock_connector(evse_id).await.ok(),
        _ => None,
    };
    let (status, stop) = match unlocked {
        Some(stop) => ("Unlocked", stop),
        None => ("UnknownConnector", None),
    };

    let response = UnlockConnectorResponse {
        status: reply_status("UnlockConnector", status)?,
        status_info: None,
    };
    Ok(InboundReply::typed(&response)?.then_all(stop))
}
