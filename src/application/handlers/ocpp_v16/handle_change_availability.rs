//! ChangeAvailability handler

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::types::{AvailabilityStatus, AvailabilityType};
use serde_json::Value;
use tracing::{info, warn};

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::OcppVersion;

pub async fn handle_change_availability(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ChangeAvailabilityRequest =
        parse_request(OcppVersion::V16, "ChangeAvailability", payload)?;

    let operative = matches!(req.kind, AvailabilityType::Operative);

    info!(
        station_id = %handler.station_id(),
        connector_id = req.connector_id,
        operative,
        "ChangeAvailability"
    );

    match handler
        .core()
        .change_availability(req.connector_id, operative)
        .await
    {
        Ok((scheduled, notifications)) => {
            let status = if scheduled {
                AvailabilityStatus::Scheduled
            } else {
                AvailabilityStatus::Accepted
            };
            Ok(InboundReply::typed(&ChangeAvailabilityResponse { status })?.then_all(notifications))
        }
        Err(e) => {
            warn!(station_id = %handler.station_id(), error = %e, "ChangeAvailability rejected");
            InboundReply::typed(&ChangeAvailabilityResponse {
                status: AvailabilityStatus::Rejected,
            })
        }
    }
}
