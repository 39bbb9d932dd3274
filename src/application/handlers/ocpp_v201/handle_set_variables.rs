//! V201 SetVariables handler

use std::time::Duration;

use rust_ocpp::v2_0_1::datatypes::set_variable_result_type::SetVariableResultType;
use rust_ocpp::v2_0_1::messages::set_variables::{SetVariablesRequest, SetVariablesResponse};
use serde_json::Value;
use tracing::info;

use super::handle_get_variables::is_actual;
use crate::application::handlers::ocpp_v201_handler::heartbeat_interval_key;
use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::configuration::{SetOutcome, VariableKey};
use crate::domain::OcppVersion;

pub async fn handle_set_variables(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: SetVariablesRequest = parse_request(OcppVersion::V201, "SetVariables", payload)?;

    info!(
        station_id = %handler.station_id(),
        count = req.set_variable_data.len(),
        "V201 SetVariables"
    );

    let mut set_variable_result = Vec::with_capacity(req.set_variable_data.len());
    let mut new_heartbeat = None;
    {
        let mut store = handler.variables.lock().await;
        for data in req.set_variable_data {
            let key = VariableKey::new(data.component.name.as_str(), data.variable.name.as_str());
            let status = if !is_actual(data.attribute_type.as_ref()) {
                "NotSupportedAttributeType"
            } else {
                match store.set(&key, &data.attribute_value) {
                    SetOutcome::Accepted => {
                        if key == heartbeat_interval_key() {
                            new_heartbeat = data.attribute_value.trim().parse::<u64>().ok();
                        }
                        "Accepted"
                    }
                    SetOutcome::Rejected => "Rejected",
                    SetOutcome::Unknown if store.has_component(&key.component) => {
                        "UnknownVariable"
                    }
                    SetOutcome::Unknown => "UnknownComponent",
                }
            };
            info!(
                station_id = %handler.station_id(),
                variable = %key,
                status,
                "SetVariable"
            );
            set_variable_result.push(SetVariableResultType {
                attribute_type: data.attribute_type,
                attribute_status: reply_status("SetVariables", status)?,
                attribute_status_info: None,
                component: data.component,
                variable: data.variable,
            });
        }
    }

    if let Some(secs) = new_heartbeat {
        handler
            .core()
            .heartbeat
            .reschedule(Duration::from_secs(secs))
            .await;
    }

    InboundReply::typed(&SetVariablesResponse {
        set_variable_result,
    })
}
