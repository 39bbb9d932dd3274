//! RemoteStartTransaction handler

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::types::RemoteStartStopStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::OcppVersion;

pub async fn handle_remote_start_transaction(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: RemoteStartTransactionRequest =
        parse_request(OcppVersion::V16, "RemoteStartTransaction", payload)?;
    let connector_id = req.connector_id.and_then(|id| u32::try_from(id).ok());

    info!(
        station_id = %handler.station_id(),
        connector_id = ?connector_id,
        id_tag = req.id_tag.as_str(),
        has_profile = req.charging_profile.is_some(),
        "RemoteStartTransaction"
    );

    let start = handler
        .core()
        .accept_remote_start(connector_id, &req.id_tag, None)
        .await;
    let status = if start.is_some() {
        RemoteStartStopStatus::Accepted
    } else {
        RemoteStartStopStatus::Rejected
    };

    let reply = InboundReply::typed(&RemoteStartTransactionResponse { status })?;
    Ok(reply.then_all(start))
}
