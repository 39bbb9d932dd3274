//! GetConfiguration handler

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::types::KeyValue;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::configuration::ConfigEntry;
use crate::domain::OcppVersion;

fn key_value(key: &str, entry: &ConfigEntry) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        readonly: entry.is_read_only(),
        value: Some(entry.value.clone()),
    }
}

pub async fn handle_get_configuration(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: GetConfigurationRequest =
        parse_request(OcppVersion::V16, "GetConfiguration", payload)?;
    let requested = req.key.unwrap_or_default();

    info!(
        station_id = %handler.station_id(),
        keys = requested.len(),
        "GetConfiguration"
    );

    let store = handler.configuration.lock().await;

    let mut configuration_key = Vec::new();
    let mut unknown_key = Vec::new();

    if requested.is_empty() {
        configuration_key.extend(store.iter().map(|(key, entry)| key_value(key, entry)));
    } else {
        for key in requested {
            match store.get(&key) {
                Some(entry) => configuration_key.push(key_value(&key, entry)),
                None => unknown_key.push(key),
            }
        }
    }

    InboundReply::typed(&GetConfigurationResponse {
        configuration_key: Some(configuration_key),
        unknown_key: (!unknown_key.is_empty()).then_some(unknown_key),
    })
}
