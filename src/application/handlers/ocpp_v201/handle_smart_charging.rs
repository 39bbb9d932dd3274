//! V201 SetChargingProfile, ClearChargingProfile and GetCompositeSchedule

use chrono::Utc;
use rust_ocpp::v2_0_1::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v2_0_1::messages::get_composite_schedule::GetCompositeScheduleRequest;
use rust_ocpp::v2_0_1::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use serde_json::{json, Value};
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::charging_profile::{ChargingProfile, ProfileCriteria};
use crate::domain::OcppVersion;

fn evse(action: &str, id: i32) -> Result<u32, InboundError> {
    u32::try_from(id).map_err(|e| InboundError::format_violation(OcppVersion::V201, action, e))
}

pub async fn handle_set_charging_profile(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let raw_profile = payload.get("chargingProfile").cloned().unwrap_or_default();
    let req: SetChargingProfileRequest =
        parse_request(OcppVersion::V201, "SetChargingProfile", payload)?;
    let evse_id = evse("SetChargingProfile", req.evse_id)?;

    let profile = ChargingProfile::from_ocpp(evse_id, &raw_profile).ok_or_else(|| {
        InboundError::format_violation(
            OcppVersion::V201,
            "SetChargingProfile",
            "chargingProfile lacks id, stackLevel or purpose",
        )
    })?;

    info!(
        station_id = %handler.station_id(),
        evse_id,
        profile_id = profile.profile_id,
        "V201 SetChargingProfile"
    );

    let status = match handler.core().install_profile(profile).await {
        Ok(()) => "Accepted",
        Err(_) => "Rejected",
    };
    InboundReply::typed(&SetChargingProfileResponse {
        status: reply_status("SetChargingProfile", status)?,
        status_info: None,
    })
}

pub async fn handle_clear_charging_profile(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ClearChargingProfileRequest =
        parse_request(OcppVersion::V201, "ClearChargingProfile", payload)?;

    let mut criteria = ProfileCriteria {
        profile_id: req.charging_profile_id,
        ..Default::default()
    };
    if let Some(criterion) = req.charging_profile_criteria {
        criteria.connector_id = criterion.evse_id.and_then(|id| u32::try_from(id).ok());
        criteria.purpose = criterion.charging_profile_purpose.map(|p| format!("{p:?}"));
        criteria.stack_level = criterion.stack_level;
    }
    let removed = handler.core().clear_profiles(&criteria).await;

    info!(station_id = %handler.station_id(), removed, "V201 ClearChargingProfile");

    let status = if removed > 0 { "Accepted" } else { "Unknown" };
    InboundReply::typed(&ClearChargingProfileResponse {
        status: reply_status("ClearChargingProfile", status)?,
        status_info: None,
    })
}

/// Answered as JSON: the schedule periods are echoed from the installed
/// profile as received.
pub async fn handle_get_composite_schedule(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: GetCompositeScheduleRequest =
        parse_request(OcppVersion::V201, "GetCompositeSchedule", payload)?;
    let evse_id = evse("GetCompositeSchedule", req.evse_id)?;

    info!(
        station_id = %handler.station_id(),
        evse_id,
        duration = req.duration,
        "V201 GetCompositeSchedule"
    );

    let Some(profile) = handler.core().effective_profile(evse_id).await else {
        return Ok(json!({ "status": "Rejected" }).into());
    };

    let rate_unit = req
        .charging_rate_unit
        .map(|unit| format!("{unit:?}"))
        .or_else(|| {
            profile
                .schedule
                .get("chargingRateUnit")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "W".to_string());
    let periods = profile
        .schedule
        .get("chargingSchedulePeriod")
        .cloned()
        .unwrap_or_else(|| json!([]));

    Ok(json!({
        "status": "Accepted",
        "schedule": {
            "evseId": evse_id,
            "duration": req.duration,
            "scheduleStart": Utc::now().to_rfc3339(),
            "chargingRateUnit": rate_unit,
            "chargingSchedulePeriod": periods,
        }
    })
    .into())
}
