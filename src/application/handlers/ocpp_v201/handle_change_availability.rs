//! V201 ChangeAvailability handler
//!
//! Without an `evse` the change applies to the whole station.

use rust_ocpp::v2_0_1::enumerations::operational_status_enum_type::OperationalStatusEnumType;
use rust_ocpp::v2_0_1::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::OcppVersion;

pub async fn handle_change_availability(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ChangeAvailabilityRequest =
        parse_request(OcppVersion::V201, "ChangeAvailability", payload)?;

    let operative = matches!(req.operational_status, OperationalStatusEnumType::Operative);
    let connector_id = req
        .evse
        .as_ref()
        .map(|e| u32::try_from(e.id).unwrap_or(u32::MAX))
        .unwrap_or(0);

    info!(
        station_id = %handler.station_id(),
        evse_id = connector_id,
        operative,
        "V201 ChangeAvailability"
    );

    let (status, notifications) = match handler
        .core()
        .change_availability(connector_id, operative)
        .await
    {
        Ok((true, notifications)) => ("Scheduled", notifications),
        Ok((false, notifications)) => ("Accepted", notifications),
        Err(e) => {
            warn!(station_id = %handler.station_id(), error = %e, "V201 ChangeAvailability rejected");
            ("Rejected", Vec::new())
        }
    };

    let response = ChangeAvailabilityResponse {
        status: reply_status("ChangeAvailability", status)?,
        status_info: None,
    };
    Ok(InboundReply::typed(&response)?.then_all(notifications))
}
