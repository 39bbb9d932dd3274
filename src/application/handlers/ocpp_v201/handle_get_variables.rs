//! V201 GetVariables handler
//!
//! Each requested (component, variable) pair gets its own result; unknown
//! pairs never fail the whole call. Only the `Actual` attribute is kept, so
//! any other attribute type is answered `NotSupportedAttributeType`.

use rust_ocpp::v2_0_1::datatypes::get_variable_result_type::GetVariableResultType;
use rust_ocpp::v2_0_1::messages::get_variables::{GetVariablesRequest, GetVariablesResponse};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{
    parse_request, reply_status, InboundError, InboundReply, ProtocolHandler,
};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::configuration::VariableKey;
use crate::domain::OcppVersion;

/// Whether an optional `attributeType` names the actual value.
pub(super) fn is_actual<T: std::fmt::Debug>(attribute_type: Option<&T>) -> bool {
    attribute_type.map_or(true, |kind| format!("{kind:?}") == "Actual")
}

pub async fn handle_get_variables(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: GetVariablesRequest = parse_request(OcppVersion::V201, "GetVariables", payload)?;

    info!(
        station_id = %handler.station_id(),
        count = req.get_variable_data.len(),
        "V201 GetVariables"
    );

    let store = handler.variables.lock().await;
    let mut get_variable_result = Vec::with_capacity(req.get_variable_data.len());

    for data in req.get_variable_data {
        let key = VariableKey::new(data.component.name.as_str(), data.variable.name.as_str());

        let (status, value) = if !is_actual(data.attribute_type.as_ref()) {
            ("NotSupportedAttributeType", None)
        } else {
            match store.get(&key) {
                Some(entry) => ("Accepted", Some(entry.value.clone())),
                None if store.has_component(&key.component) => ("UnknownVariable", None),
                None => ("UnknownComponent", None),
            }
        };

        get_variable_result.push(GetVariableResultType {
            attribute_status: reply_status("GetVariables", status)?,
            attribute_status_info: None,
            attribute_type: data.attribute_type,
            attribute_value: value,
            component: data.component,
            variable: data.variable,
        });
    }

    InboundReply::typed(&GetVariablesResponse {
        get_variable_result,
    })
}
