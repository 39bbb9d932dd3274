//! V201 RequestStopTransaction handler

use rust_ocpp::v2_0_1::messages::request_stop_transaction::{
    RequestStopTransactionRequest, RequestStopTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::OcppVersion;

pub async fn handle_request_stop_transaction(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: RequestStopTransactionRequest =
        parse_request(OcppVersion::V201, "RequestStopTransaction", payload)?;

    info!(
        station_id = %handler.station_id(),
        transaction_id = req.transaction_id.as_str(),
        "V201 RequestStopTransaction"
    );

    let stop = match req.transaction_id.parse::<i32>() {
        Ok(transaction_id) => handler.core().accept_remote_stop(transaction_id).await,
        Err(_) => None,
    };
    let status = if stop.is_some() { "Accepted" } else { "Rejected" };

    let response = RequestStopTransactionResponse {
        status: reply_status("RequestStopTransaction", status)?,
        status_info: None,
    };
    Ok(InboundReply::typed(&response)?.then_all(stop))
}
