//! UnlockConnector handler

use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::types::UnlockStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::OcppVersion;

pub async fn handle_unlock_connector(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: UnlockConnectorRequest = parse_request(OcppVersion::V16, "UnlockConnector", payload)?;

    info!(
        station_id = %handler.station_id(),
        connector_id = req.connector_id,
        "UnlockConnector"
    );

    let (status, stop) = match handler.core().unlock_connector(req.connector_id).await {
        Ok(stop) => (UnlockStatus::Unlocked, stop),
        Err(_) => (UnlockStatus::NotSupported, None),
    };

    Ok(InboundReply::typed(&UnlockConnectorResponse { status })?.then_all(stop))
}
