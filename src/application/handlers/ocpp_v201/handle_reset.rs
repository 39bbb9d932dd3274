//! V201 Reset handler
//!
//! `Immediate` reboots right away. `OnIdle` waits for running transactions
//! to end and is answered `Scheduled` while any is active.

use rust_ocpp::v2_0_1::enumerations::reset_enum_type::ResetEnumType;
use rust_ocpp::v2_0_1::messages::reset::{ResetRequest, ResetResponse};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::application::station::{ResetKind, StationCommand};
use crate::domain::OcppVersion;

fn reply(status: &str) -> Result<InboundReply, InboundError> {
    InboundReply::typed(&ResetResponse {
        status: reply_status("Reset", status)?,
        status_info: None,
    })
}

pub async fn handle_reset(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ResetRequest = parse_request(OcppVersion::V201, "Reset", payload)?;

    info!(
        station_id = %handler.station_id(),
        request_type = ?req.request_type,
        evse_id = ?req.evse_id,
        "V201 Reset"
    );

    if req.evse_id.is_some() {
        // Per-EVSE reset is not simulated
        return reply("Rejected");
    }

    let (kind, status) = match req.request_type {
        ResetEnumType::Immediate => (ResetKind::Hard, "Accepted"),
        ResetEnumType::OnIdle if handler.core().has_active_transactions().await => {
            (ResetKind::Soft, "Scheduled")
        }
        ResetEnumType::OnIdle => (ResetKind::Soft, "Accepted"),
    };

    Ok(reply(status)?.then(StationCommand::Reset(kind)))
}
