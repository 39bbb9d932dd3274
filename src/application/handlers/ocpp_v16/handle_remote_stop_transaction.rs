//! RemoteStopTransaction handler

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::types::RemoteStartStopStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::OcppVersion;

pub async fn handle_remote_stop_transaction(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: RemoteStopTransactionRequest =
        parse_request(OcppVersion::V16, "RemoteStopTransaction", payload)?;

    info!(
        station_id = %handler.station_id(),
        transaction_id = req.transaction_id,
        "RemoteStopTransaction"
    );

    let stop = handler.core().accept_remote_stop(req.transaction_id).await;
    let status = match stop {
        Some(_) => RemoteStartStopStatus::Accepted,
        None => RemoteStartStopStatus::Rejected,
    };

    Ok(InboundReply::typed(&RemoteStopTransactionResponse { status })?.then_all(stop))
}
