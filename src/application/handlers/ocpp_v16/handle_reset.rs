//! Reset handler

use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::types::{ResetRequestStatus, ResetResponseStatus};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::application::station::{ResetKind, StationCommand};
use crate::domain::OcppVersion;

pub async fn handle_reset(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ResetRequest = parse_request(OcppVersion::V16, "Reset", payload)?;

    let kind = match req.kind {
        ResetRequestStatus::Hard => ResetKind::Hard,
        ResetRequestStatus::Soft => ResetKind::Soft,
    };

    info!(station_id = %handler.station_id(), ?kind, "Reset");

    let response = ResetResponse {
        status: ResetResponseStatus::Accepted,
    };
    Ok(InboundReply::typed(&response)?.then(StationCommand::Reset(kind)))
}
