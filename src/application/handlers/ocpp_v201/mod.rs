//! OCPP 2.0.1 inbound actions
//!
//! Routes CSMS-initiated action names to their handlers. Payloads are
//! deserialized into `rust_ocpp::v2_0_1` requests and answered with the
//! matching typed responses. Unknown actions are answered with CALLERROR
//! `NotImplemented`.

use rust_ocpp::v2_0_1::messages::clear_cache::ClearCacheResponse;
use serde_json::Value;
use tracing::warn;

use super::{reply_status, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV201;

mod handle_change_availability;
mod handle_data_transfer;
mod handle_get_variables;
mod handle_request_start_transaction;
mod handle_request_stop_transaction;
mod handle_reset;
mod handle_set_variables;
mod handle_smart_charging;
mod handle_trigger_message;
mod handle_unlock_connector;

pub use handle_change_availability::handle_change_availability;
pub use handle_data_transfer::handle_data_transfer;
pub use handle_get_variables::handle_get_variables;
pub use handle_request_start_transaction::handle_request_start_transaction;
pub use handle_request_stop_transaction::handle_request_stop_transaction;
pub use handle_reset::handle_reset;
pub use handle_set_variables::handle_set_variables;
pub use handle_smart_charging::{
    handle_clear_charging_profile, handle_get_composite_schedule, handle_set_charging_profile,
};
pub use handle_trigger_message::handle_trigger_message;
pub use handle_unlock_connector::handle_unlock_connector;

/// Routes OCPP 2.0.1 actions to their respective handlers.
pub async fn action_matcher(
    handler: &OcppHandlerV201,
    action: &str,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    match action {
        "RequestStartTransaction" => handle_request_start_transaction(handler, payload).await,
        "RequestStopTransaction" => handle_request_stop_transaction(handler, payload).await,
        "GetVariables" => handle_get_variables(handler, payload).await,
        "SetVariables" => handle_set_variables(handler, payload).await,
        "Reset" => handle_reset(handler, payload).await,
        "ChangeAvailability" => handle_change_availability(handler, payload).await,
        "UnlockConnector" => handle_unlock_connector(handler, payload).await,
        "TriggerMessage" => handle_trigger_message(handler, payload).await,
        "ClearCache" => InboundReply::typed(&ClearCacheResponse {
            status: reply_status("ClearCache", "Accepted")?,
            status_info: None,
        }),
        "DataTransfer" => handle_data_transfer(handler, payload).await,
        "SetChargingProfile" => handle_set_charging_profile(handler, payload).await,
        "ClearChargingProfile" => handle_clear_charging_profile(handler, payload).await,
        "GetCompositeSchedule" => handle_get_composite_schedule(handler, payload).await,

        unknown => {
            warn!(
                station_id = %handler.station_id(),
                action = unknown,
                "Unknown OCPP 2.0.1 action"
            );
            Err(InboundError::not_implemented(unknown))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::station::{ResetKind, StationCommand, StationContext};
    use crate::config::SimulatorSettings;
    use crate::domain::{OcppVersion, StationConfig, StopReason};
    use serde_json::json;

    fn handler(connectors: u32) -> OcppHandlerV201 {
        let config = StationConfig::new("CS001", OcppVersion::V201, "ws://localhost:9000/ocpp")
            .with_connectors(connectors);
        let (ctx, _rx) = StationContext::new(config, SimulatorSettings::default());
        OcppHandlerV201::new(ctx)
    }

    fn variable(component: &str, name: &str) -> Value {
        json!({"component": {"name": component}, "variable": {"name": name}})
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let h = handler(1);
        let err = action_matcher(&h, "GetBaseReport", json!({})).await.unwrap_err();
        assert_eq!(err.code, "NotImplemented");
    }

    #[tokio::test]
    async fn malformed_payload_is_format_violation() {
        let h = handler(1);
        let err = action_matcher(&h, "RequestStartTransaction", json!({"evseId": "one"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "FormatViolation");
    }

    #[tokio::test]
    async fn request_start_carries_remote_start_id() {
        let h = handler(1);
        let reply = action_matcher(
            &h,
            "RequestStartTransaction",
            json!({
                "evseId": 1,
                "remoteStartId": 77,
                "idToken": {"idToken": "TAG1", "type": "Central"}
            }),
        )
        .await
        .unwrap();

        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::StartTransaction {
                connector_id: 1,
                id_tag: "TAG1".into(),
                remote_start_id: Some(77),
            }]
        );
    }

    #[tokio::test]
    async fn request_stop_by_string_id() {
        let h = handler(1);
        let tx = h.core().ctx.charge_point.lock().await.begin_transaction(1, "TAG1").unwrap();

        let reply = action_matcher(
            &h,
            "RequestStopTransaction",
            json!({"transactionId": tx.transaction_id.to_string()}),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::StopTransaction { connector_id: 1, reason: StopReason::Remote }]
        );

        let unknown = action_matcher(&h, "RequestStopTransaction", json!({"transactionId": "abc"}))
            .await
            .unwrap();
        assert_eq!(unknown.payload["status"], "Rejected");
    }

    #[tokio::test]
    async fn get_variables_reports_each_key() {
        let h = handler(1);
        let reply = action_matcher(
            &h,
            "GetVariables",
            json!({"getVariableData": [
                variable("OCPPCommCtrlr", "HeartbeatInterval"),
                variable("OCPPCommCtrlr", "Nope"),
                variable("NoSuchCtrlr", "HeartbeatInterval"),
            ]}),
        )
        .await
        .unwrap();

        let results = reply.payload["getVariableResult"].as_array().unwrap();
        assert_eq!(results[0]["attributeStatus"], "Accepted");
        assert_eq!(results[0]["attributeValue"], "60");
        assert_eq!(results[0]["component"]["name"], "OCPPCommCtrlr");
        assert_eq!(results[1]["attributeStatus"], "UnknownVariable");
        assert_eq!(results[2]["attributeStatus"], "UnknownComponent");
    }

    #[tokio::test]
    async fn get_variables_answers_only_actual_attribute() {
        let h = handler(1);
        let mut target = variable("OCPPCommCtrlr", "HeartbeatInterval");
        target["attributeType"] = json!("Target");
        let mut actual = variable("OCPPCommCtrlr", "HeartbeatInterval");
        actual["attributeType"] = json!("Actual");

        let reply = action_matcher(&h, "GetVariables", json!({"getVariableData": [target, actual]}))
            .await
            .unwrap();

        let results = reply.payload["getVariableResult"].as_array().unwrap();
        assert_eq!(results[0]["attributeStatus"], "NotSupportedAttributeType");
        assert_eq!(results[0]["attributeType"], "Target");
        assert!(results[0]["attributeValue"].is_null());
        assert_eq!(results[1]["attributeStatus"], "Accepted");
        assert_eq!(results[1]["attributeValue"], "60");
    }

    #[tokio::test]
    async fn set_variables_leaves_store_alone_for_other_attributes() {
        let h = handler(1);
        let mut max_set = variable("OCPPCommCtrlr", "HeartbeatInterval");
        max_set["attributeValue"] = json!("15");
        max_set["attributeType"] = json!("MaxSet");

        let reply = action_matcher(&h, "SetVariables", json!({"setVariableData": [max_set]}))
            .await
            .unwrap();

        let results = reply.payload["setVariableResult"].as_array().unwrap();
        assert_eq!(results[0]["attributeStatus"], "NotSupportedAttributeType");
        let key = crate::domain::configuration::VariableKey::new("OCPPCommCtrlr", "HeartbeatInterval");
        assert_eq!(h.variables.lock().await.get(&key).unwrap().value, "60");
    }

    #[tokio::test]
    async fn clear_cache_and_data_transfer_answer_typed_shapes() {
        let h = handler(1);
        let cleared = action_matcher(&h, "ClearCache", json!({})).await.unwrap();
        assert_eq!(cleared.payload["status"], "Accepted");

        let transfer = action_matcher(&h, "DataTransfer", json!({"vendorId": "acme"}))
            .await
            .unwrap();
        assert_eq!(transfer.payload["status"], "UnknownVendorId");
        assert!(transfer.payload["data"].is_null());

        let bad = action_matcher(&h, "TriggerMessage", json!({"requestedMessage": "Coffee"}))
            .await
            .unwrap_err();
        assert_eq!(bad.code, "FormatViolation");
    }

    #[tokio::test]
    async fn set_variables_outcomes() {
        let h = handler(1);
        let mut interval = variable("SampledDataCtrlr", "TxUpdatedInterval");
        interval["attributeValue"] = json!("10");
        let mut readonly = variable("EVSE", "Count");
        readonly["attributeValue"] = json!("4");

        let reply = action_matcher(
            &h,
            "SetVariables",
            json!({"setVariableData": [interval, readonly]}),
        )
        .await
        .unwrap();

        let results = reply.payload["setVariableResult"].as_array().unwrap();
        assert_eq!(results[0]["attributeStatus"], "Accepted");
        assert_eq!(results[1]["attributeStatus"], "Rejected");
        assert_eq!(h.meter_sample_interval().await, std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn on_idle_reset_is_scheduled_while_charging() {
        let h = handler(1);
        h.core().ctx.charge_point.lock().await.begin_transaction(1, "TAG1").unwrap();

        let reply = action_matcher(&h, "Reset", json!({"type": "OnIdle"})).await.unwrap();
        assert_eq!(reply.payload["status"], "Scheduled");
        assert_eq!(reply.follow_up, vec![StationCommand::Reset(ResetKind::Soft)]);

        let now = action_matcher(&h, "Reset", json!({"type": "Immediate"})).await.unwrap();
        assert_eq!(now.payload["status"], "Accepted");
        assert_eq!(now.follow_up, vec![StationCommand::Reset(ResetKind::Hard)]);
    }

    #[tokio::test]
    async fn change_availability_whole_station() {
        let h = handler(2);
        let reply = action_matcher(
            &h,
            "ChangeAvailability",
            json!({"operationalStatus": "Inoperative"}),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(reply.follow_up.len(), 2);
    }

    #[tokio::test]
    async fn trigger_message_status_notification() {
        let h = handler(2);
        let reply = action_matcher(
            &h,
            "TriggerMessage",
            json!({"requestedMessage": "StatusNotification", "evse": {"id": 2}}),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::Trigger {
                message: crate::application::station::TriggerKind::StatusNotification,
                connector_id: Some(2),
            }]
        );

        let unsupported = action_matcher(
            &h,
            "TriggerMessage",
            json!({"requestedMessage": "LogStatusNotification"}),
        )
        .await
        .unwrap();
        assert_eq!(unsupported.payload["status"], "NotImplemented");
    }

    #[tokio::test]
    async fn charging_profile_round() {
        let h = handler(1);
        let set = action_matcher(
            &h,
            "SetChargingProfile",
            json!({
                "evseId": 1,
                "chargingProfile": {
                    "id": 3,
                    "stackLevel": 0,
                    "chargingProfilePurpose": "TxDefaultProfile",
                    "chargingProfileKind": "Absolute",
                    "chargingSchedule": [{
                        "id": 1,
                        "chargingRateUnit": "A",
                        "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 16.0}]
                    }]
                }
            }),
        )
        .await
        .unwrap();
        assert_eq!(set.payload["status"], "Accepted");

        let composite = action_matcher(
            &h,
            "GetCompositeSchedule",
            json!({"duration": 600, "evseId": 1}),
        )
        .await
        .unwrap();
        assert_eq!(composite.payload["status"], "Accepted");
        assert_eq!(composite.payload["schedule"]["evseId"], 1);
        assert_eq!(composite.payload["schedule"]["chargingRateUnit"], "A");

        let clear = action_matcher(
            &h,
            "ClearChargingProfile",
            json!({"chargingProfileCriteria": {"chargingProfilePurpose": "TxDefaultProfile"}}),
        )
        .await
        .unwrap();
        assert_eq!(clear.payload["status"], "Accepted");
    }

    #[tokio::test]
    async fn unlock_unknown_evse() {
        let h = handler(1);
        let reply = action_matcher(&h, "UnlockConnector", json!({"evseId": 4, "connectorId": 1}))
            .await
            .unwrap();
        assert_eq!(reply.payload["status"], "UnknownConnector");
    }
}
