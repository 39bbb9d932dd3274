//! OCPP 1.6J inbound actions
//!
//! Routes CSMS-initiated action names to their handlers. Requests are
//! parsed into `rust_ocpp::v1_6` messages and answered with their typed
//! responses.

use rust_ocpp::v1_6::messages::clear_cache::ClearCacheResponse;
use rust_ocpp::v1_6::types::ClearCacheStatus;
use serde_json::{json, Value};
use tracing::warn;

use super::{InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;

mod handle_change_availability;
mod handle_change_configuration;
mod handle_data_transfer;
mod handle_get_configuration;
mod handle_remote_start_transaction;
mod handle_remote_stop_transaction;
mod handle_reset;
mod handle_smart_charging;
mod handle_trigger_message;
mod handle_unlock_connector;

pub use handle_change_availability::handle_change_availability;
pub use handle_change_configuration::handle_change_configuration;
pub use handle_data_transfer::handle_data_transfer;
pub use handle_get_configuration::handle_get_configuration;
pub use handle_remote_start_transaction::handle_remote_start_transaction;
pub use handle_remote_stop_transaction::handle_remote_stop_transaction;
pub use handle_reset::handle_reset;
pub use handle_smart_charging::{
    handle_clear_charging_profile, handle_get_composite_schedule, handle_set_charging_profile,
};
pub use handle_trigger_message::handle_trigger_message;
pub use handle_unlock_connector::handle_unlock_connector;

/// Routes OCPP 1.6J actions to their handlers.
///
/// Unknown actions are answered with `{"status": "NotSupported"}` rather
/// than a CALLERROR.
pub async fn action_matcher(
    handler: &OcppHandlerV16,
    action: &str,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    match action {
        "RemoteStartTransaction" => handle_remote_start_transaction(handler, payload).await,
        "RemoteStopTransaction" => handle_remote_stop_transaction(handler, payload).await,
        "GetConfiguration" => handle_get_configuration(handler, payload).await,
        "ChangeConfiguration" => handle_change_configuration(handler, payload).await,
        "Reset" => handle_reset(handler, payload).await,
        "ChangeAvailability" => handle_change_availability(handler, payload).await,
        "UnlockConnector" => handle_unlock_connector(handler, payload).await,
        "TriggerMessage" => handle_trigger_message(handler, payload).await,
        "ClearCache" => InboundReply::typed(&ClearCacheResponse {
            status: ClearCacheStatus::Accepted,
        }),
        "DataTransfer" => handle_data_transfer(handler, payload).await,
        "SetChargingProfile" => handle_set_charging_profile(handler, payload).await,
        "ClearChargingProfile" => handle_clear_charging_profile(handler, payload).await,
        "GetCompositeSchedule" => handle_get_composite_schedule(handler, payload).await,

        unknown => {
            warn!(
                station_id = %handler.station_id(),
                action = unknown,
                "Unsupported OCPP 1.6 action"
            );
            Ok(json!({ "status": "NotSupported" }).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::station::{StationCommand, StationContext};
    use crate::config::SimulatorSettings;
    use crate::domain::{OcppVersion, StationConfig, StopReason};
    use std::sync::Arc;

    pub(super) fn handler(connectors: u32) -> OcppHandlerV16 {
        let config = StationConfig::new("CP001", OcppVersion::V16, "ws://localhost:9000/ocpp")
            .with_connectors(connectors);
        let (ctx, _rx) = StationContext::new(config, SimulatorSettings::default());
        OcppHandlerV16::new(ctx)
    }

    fn ctx(handler: &OcppHandlerV16) -> &Arc<StationContext> {
        &handler.core().ctx
    }

    #[tokio::test]
    async fn unknown_action_is_not_supported() {
        let h = handler(1);
        let reply = action_matcher(&h, "CancelReservation", json!({})).await.unwrap();
        assert_eq!(reply.payload, json!({"status": "NotSupported"}));
        assert!(reply.follow_up.is_empty());
    }

    #[tokio::test]
    async fn remote_start_accepts_available_connector() {
        let h = handler(2);
        let reply = action_matcher(
            &h,
            "RemoteStartTransaction",
            json!({"connectorId": 2, "idTag": "TAG1"}),
        )
        .await
        .unwrap();

        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::StartTransaction {
                connector_id: 2,
                id_tag: "TAG1".into(),
                remote_start_id: None,
            }]
        );
    }

    #[tokio::test]
    async fn remote_start_without_id_tag_is_formation_violation() {
        let h = handler(1);
        let err = action_matcher(&h, "RemoteStartTransaction", json!({"connectorId": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "FormationViolation");
    }

    #[tokio::test]
    async fn remote_start_with_numeric_id_tag_is_formation_violation() {
        let h = handler(1);
        let err = action_matcher(
            &h,
            "RemoteStartTransaction",
            json!({"connectorId": 1, "idTag": 42}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "FormationViolation");
    }

    #[tokio::test]
    async fn remote_start_with_profile_is_accepted() {
        let h = handler(1);
        let reply = action_matcher(
            &h,
            "RemoteStartTransaction",
            json!({
                "idTag": "TAG1",
                "chargingProfile": {
                    "chargingProfileId": 3,
                    "stackLevel": 0,
                    "chargingProfilePurpose": "TxProfile",
                    "chargingProfileKind": "Relative",
                    "chargingSchedule": {
                        "chargingRateUnit": "W",
                        "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 11000.0}]
                    }
                }
            }),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload, json!({"status": "Accepted"}));
        assert_eq!(reply.follow_up.len(), 1);
    }

    #[tokio::test]
    async fn clear_cache_and_reset_answer_exact_shapes() {
        let h = handler(1);
        let cleared = action_matcher(&h, "ClearCache", json!({})).await.unwrap();
        assert_eq!(cleared.payload, json!({"status": "Accepted"}));

        let reset = action_matcher(&h, "Reset", json!({"type": "Soft"})).await.unwrap();
        assert_eq!(reset.payload, json!({"status": "Accepted"}));

        let bad = action_matcher(&h, "Reset", json!({"type": "Sideways"}))
            .await
            .unwrap_err();
        assert_eq!(bad.code, "FormationViolation");
    }

    #[tokio::test]
    async fn remote_stop_unknown_transaction_is_rejected() {
        let h = handler(1);
        let reply = action_matcher(&h, "RemoteStopTransaction", json!({"transactionId": 42}))
            .await
            .unwrap();
        assert_eq!(reply.payload["status"], "Rejected");
    }

    #[tokio::test]
    async fn remote_stop_running_transaction() {
        let h = handler(1);
        let tx = ctx(&h).charge_point.lock().await.begin_transaction(1, "TAG1").unwrap();
        let reply = action_matcher(
            &h,
            "RemoteStopTransaction",
            json!({"transactionId": tx.transaction_id}),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::StopTransaction {
                connector_id: 1,
                reason: StopReason::Remote
            }]
        );
    }

    #[tokio::test]
    async fn get_configuration_reports_unknown_keys() {
        let h = handler(1);
        let reply = action_matcher(
            &h,
            "GetConfiguration",
            json!({"key": ["HeartbeatInterval", "NoSuchKey"]}),
        )
        .await
        .unwrap();

        let keys = reply.payload["configurationKey"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["key"], "HeartbeatInterval");
        assert_eq!(keys[0]["readonly"], false);
        assert!(keys[0]["value"].is_string());
        assert_eq!(reply.payload["unknownKey"], json!(["NoSuchKey"]));
    }

    #[tokio::test]
    async fn get_configuration_without_keys_lists_all() {
        let h = handler(1);
        let reply = action_matcher(&h, "GetConfiguration", json!({})).await.unwrap();
        let keys = reply.payload["configurationKey"].as_array().unwrap();
        assert_eq!(keys.len(), h.configuration.lock().await.len());
        assert!(reply.payload["unknownKey"].is_null());
    }

    #[tokio::test]
    async fn change_configuration_outcomes() {
        let h = handler(1);
        let set = |key: &str, value: &str| json!({"key": key, "value": value});

        let ok = action_matcher(&h, "ChangeConfiguration", set("MeterValueSampleInterval", "15"))
            .await
            .unwrap();
        assert_eq!(ok.payload["status"], "Accepted");
        assert_eq!(h.meter_sample_interval().await, std::time::Duration::from_secs(15));

        let ro = action_matcher(&h, "ChangeConfiguration", set("NumberOfConnectors", "4"))
            .await
            .unwrap();
        assert_eq!(ro.payload["status"], "Rejected");

        let unknown = action_matcher(&h, "ChangeConfiguration", set("Nope", "1"))
            .await
            .unwrap();
        assert_eq!(unknown.payload["status"], "NotSupported");
    }

    #[tokio::test]
    async fn reset_queues_reboot() {
        let h = handler(1);
        let reply = action_matcher(&h, "Reset", json!({"type": "Hard"})).await.unwrap();
        assert_eq!(reply.payload["status"], "Accepted");
        assert_eq!(
            reply.follow_up,
            vec![StationCommand::Reset(crate::application::station::ResetKind::Hard)]
        );
    }

    #[tokio::test]
    async fn change_availability_is_scheduled_during_transaction() {
        let h = handler(1);
        ctx(&h).charge_point.lock().await.begin_transaction(1, "TAG1").unwrap();
        let reply = action_matcher(
            &h,
            "ChangeAvailability",
            json!({"connectorId": 1, "type": "Inoperative"}),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Scheduled");
    }

    #[tokio::test]
    async fn unlock_connector_stops_transaction() {
        let h = handler(1);
        ctx(&h).charge_point.lock().await.begin_transaction(1, "TAG1").unwrap();
        let reply = action_matcher(&h, "UnlockConnector", json!({"connectorId": 1}))
            .await
            .unwrap();
        assert_eq!(reply.payload["status"], "Unlocked");
        assert_eq!(reply.follow_up.len(), 1);

        let unknown = action_matcher(&h, "UnlockConnector", json!({"connectorId": 7}))
            .await
            .unwrap();
        assert_eq!(unknown.payload["status"], "NotSupported");
    }

    #[tokio::test]
    async fn trigger_message_variants() {
        let h = handler(1);
        let hb = action_matcher(&h, "TriggerMessage", json!({"requestedMessage": "Heartbeat"}))
            .await
            .unwrap();
        assert_eq!(hb.payload["status"], "Accepted");
        assert_eq!(hb.follow_up.len(), 1);

        let fw = action_matcher(
            &h,
            "TriggerMessage",
            json!({"requestedMessage": "FirmwareStatusNotification"}),
        )
        .await
        .unwrap();
        assert_eq!(fw.payload["status"], "NotImplemented");
    }

    #[tokio::test]
    async fn data_transfer_unknown_vendor() {
        let h = handler(1);
        let reply = action_matcher(&h, "DataTransfer", json!({"vendorId": "acme"}))
            .await
            .unwrap();
        assert_eq!(reply.payload["status"], "UnknownVendorId");
    }

    #[tokio::test]
    async fn charging_profile_lifecycle() {
        let h = handler(1);
        let profile = json!({
            "connectorId": 1,
            "csChargingProfiles": {
                "chargingProfileId": 7,
                "stackLevel": 1,
                "chargingProfilePurpose": "TxDefaultProfile",
                "chargingProfileKind": "Absolute",
                "chargingSchedule": {
                    "chargingRateUnit": "W",
                    "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 7400.0}]
                }
            }
        });
        let set = action_matcher(&h, "SetChargingProfile", profile).await.unwrap();
        assert_eq!(set.payload["status"], "Accepted");

        let composite = action_matcher(
            &h,
            "GetCompositeSchedule",
            json!({"connectorId": 1, "duration": 3600}),
        )
        .await
        .unwrap();
        assert_eq!(composite.payload["status"], "Accepted");
        assert_eq!(composite.payload["chargingSchedule"]["chargingRateUnit"], "W");

        let clear = action_matcher(&h, "ClearChargingProfile", json!({"id": 7}))
            .await
            .unwrap();
        assert_eq!(clear.payload["status"], "Accepted");

        let again = action_matcher(&h, "ClearChargingProfile", json!({"id": 7}))
            .await
            .unwrap();
        assert_eq!(again.payload["status"], "Unknown");
    }

    #[tokio::test]
    async fn charging_profile_above_max_stack_level_is_rejected() {
        let h = handler(1);
        let reply = action_matcher(
            &h,
            "SetChargingProfile",
            json!({
                "connectorId": 1,
                "csChargingProfiles": {
                    "chargingProfileId": 1,
                    "stackLevel": 99,
                    "chargingProfilePurpose": "TxDefaultProfile",
                    "chargingProfileKind": "Absolute",
                    "chargingSchedule": {
                        "chargingRateUnit": "A",
                        "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 16.0}]
                    }
                }
            }),
        )
        .await
        .unwrap();
        assert_eq!(reply.payload["status"], "Rejected");
    }
}
