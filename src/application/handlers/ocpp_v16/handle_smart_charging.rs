//! SetChargingProfile, ClearChargingProfile and GetCompositeSchedule

use chrono::Utc;
use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::get_composite_schedule::GetCompositeScheduleRequest;
use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::{ChargingProfileStatus, ClearChargingProfileStatus};
use serde_json::{json, Value};
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::charging_profile::{ChargingProfile, ProfileCriteria};
use crate::domain::OcppVersion;

fn connector(action: &str, id: i32) -> Result<u32, InboundError> {
    u32::try_from(id).map_err(|e| InboundError::format_violation(OcppVersion::V16, action, e))
}

/// The typed request validates the profile; the stored copy keeps the
/// payload as received so it can be echoed back unchanged.
pub async fn handle_set_charging_profile(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let raw_profile = payload.get("csChargingProfiles").cloned().unwrap_or_default();
    let req: SetChargingProfileRequest =
        parse_request(OcppVersion::V16, "SetChargingProfile", payload)?;
    let connector_id = connector("SetChargingProfile", req.connector_id)?;

    let profile = ChargingProfile::from_ocpp(connector_id, &raw_profile).ok_or_else(|| {
        InboundError::format_violation(
            OcppVersion::V16,
            "SetChargingProfile",
            "csChargingProfiles lacks id, stackLevel or purpose",
        )
    })?;

    info!(
        station_id = %handler.station_id(),
        connector_id,
        profile_id = profile.profile_id,
        "SetChargingProfile"
    );

    let status = match handler.core().install_profile(profile).await {
        Ok(()) => ChargingProfileStatus::Accepted,
        Err(_) => ChargingProfileStatus::Rejected,
    };
    InboundReply::typed(&SetChargingProfileResponse { status })
}

pub async fn handle_clear_charging_profile(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ClearChargingProfileRequest =
        parse_request(OcppVersion::V16, "ClearChargingProfile", payload)?;

    let criteria = ProfileCriteria {
        profile_id: req.id,
        connector_id: req.connector_id.and_then(|id| u32::try_from(id).ok()),
        purpose: req.charging_profile_purpose.map(|p| format!("{p:?}")),
        stack_level: req.stack_level,
    };
    let removed = handler.core().clear_profiles(&criteria).await;

    info!(station_id = %handler.station_id(), removed, "ClearChargingProfile");

    let status = if removed > 0 {
        ClearChargingProfileStatus::Accepted
    } else {
        ClearChargingProfileStatus::Unknown
    };
    InboundReply::typed(&ClearChargingProfileResponse { status })
}

/// The answer echoes the stored schedule as it was installed, so it is
/// built as JSON rather than through the typed response.
pub async fn handle_get_composite_schedule(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: GetCompositeScheduleRequest =
        parse_request(OcppVersion::V16, "GetCompositeSchedule", payload)?;
    let connector_id = connector("GetCompositeSchedule", req.connector_id)?;

    info!(
        station_id = %handler.station_id(),
        connector_id,
        duration = req.duration,
        "GetCompositeSchedule"
    );

    match handler.core().effective_profile(connector_id).await {
        Some(profile) => Ok(json!({
            "status": "Accepted",
            "connectorId": connector_id,
            "scheduleStart": Utc::now().to_rfc3339(),
            "chargingSchedule": profile.schedule,
        })
        .into()),
        None => Ok(json!({ "status": "Rejected" }).into()),
    }
}
