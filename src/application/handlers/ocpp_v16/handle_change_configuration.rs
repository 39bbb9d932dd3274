//! ChangeConfiguration handler
//!
//! `HeartbeatInterval` takes effect immediately. `MeterValueSampleInterval`
//! is picked up by running meter samplers on their next tick.

use std::time::Duration;

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::types::ConfigurationStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::ocpp_v16_handler::KEY_HEARTBEAT_INTERVAL;
use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::configuration::SetOutcome;
use crate::domain::OcppVersion;

pub async fn handle_change_configuration(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: ChangeConfigurationRequest =
        parse_request(OcppVersion::V16, "ChangeConfiguration", payload)?;

    let outcome = handler.configuration.lock().await.set(&req.key, &req.value);

    info!(
        station_id = %handler.station_id(),
        key = req.key.as_str(),
        value = req.value.as_str(),
        ?outcome,
        "ChangeConfiguration"
    );

    let status = match outcome {
        SetOutcome::Accepted => {
            if req.key == KEY_HEARTBEAT_INTERVAL {
                if let Ok(secs) = req.value.trim().parse::<u64>() {
                    handler
                        .core()
                        .heartbeat
                        .reschedule(Duration::from_secs(secs))
                        .await;
                }
            }
            ConfigurationStatus::Accepted
        }
        SetOutcome::Rejected => ConfigurationStatus::Rejected,
        SetOutcome::Unknown => ConfigurationStatus::NotSupported,
    };

    InboundReply::typed(&ChangeConfigurationResponse { status })
}
