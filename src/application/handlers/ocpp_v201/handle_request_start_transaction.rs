//! V201 RequestStartTransaction handler

use rust_ocpp::v2_0_1::messages::request_start_transaction::{
    RequestStartTransactionRequest, RequestStartTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::OcppVersion;

fn reply(status: &str) -> Result<InboundReply, InboundError> {
    InboundReply::typed(&RequestStartTransactionResponse {
        status: reply_status("RequestStartTransaction", status)?,
        status_info: None,
        transaction_id: None,
    })
}

pub async fn handle_request_start_transaction(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: RequestStartTransactionRequest =
        parse_request(OcppVersion::V201, "RequestStartTransaction", payload)?;

    info!(
        station_id = %handler.station_id(),
        evse_id = ?req.evse_id,
        remote_start_id = req.remote_start_id,
        id_token = req.id_token.id_token.as_str(),
        "V201 RequestStartTransaction"
    );

    // Negative EVSE ids cannot name a connector
    let connector_id = match req.evse_id {
        Some(id) => match u32::try_from(id) {
            Ok(id) => Some(id),
            Err(_) => return reply("Rejected"),
        },
        None => None,
    };

    match handler
        .core()
        .accept_remote_start(connector_id, &req.id_token.id_token, Some(req.remote_start_id))
        .await
    {
        Some(start) => Ok(reply("Accepted")?.then(start)),
        None => reply("Rejected"),
    }
}
