//! CSMS-initiated calls, answered by the station.

mod common;

use std::time::Duration;

use common::{next_event, station, WAIT};
use ocpp_sim::domain::StopReason;
use ocpp_sim::interfaces::ws::MockCsms;
use ocpp_sim::notifications::Event;
use ocpp_sim::{OcppError, OcppVersion};
use serde_json::json;

const CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn v16_remote_start_and_stop() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP001", OcppVersion::V16);
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    let answer = csms
        .send_call(
            "CP001",
            "RemoteStartTransaction",
            json!({"connectorId": 1, "idTag": "TAG9"}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");

    let started = match next_event(&mut events, |e| matches!(e, Event::ChargingStarted(_))).await {
        Event::ChargingStarted(e) => e.transaction,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(started.id_tag, "TAG9");

    let answer = csms
        .send_call(
            "CP001",
            "RemoteStopTransaction",
            json!({"transactionId": started.transaction_id}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");

    let stop = csms.wait_for_call("CP001", "StopTransaction", WAIT).await.unwrap();
    assert_eq!(stop.payload["reason"], "Remote");

    let answer = csms
        .send_call(
            "CP001",
            "RemoteStopTransaction",
            json!({"transactionId": 999}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Rejected");
}

#[tokio::test]
async fn v16_configuration_round_trip() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP002", OcppVersion::V16);
    station.connect(None).await.unwrap();

    let answer = csms
        .send_call(
            "CP002",
            "ChangeConfiguration",
            json!({"key": "HeartbeatInterval", "value": "5"}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");
    assert_eq!(
        station.handler().core().heartbeat.interval().await,
        Some(Duration::from_secs(5))
    );

    let answer = csms
        .send_call(
            "CP002",
            "GetConfiguration",
            json!({"key": ["HeartbeatInterval", "NoSuchKey"]}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["configurationKey"][0]["value"], "5");
    assert_eq!(answer["unknownKey"][0], "NoSuchKey");
}

#[tokio::test]
async fn v16_trigger_and_errors() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP003", OcppVersion::V16);
    station.connect(None).await.unwrap();

    let answer = csms
        .send_call(
            "CP003",
            "TriggerMessage",
            json!({"requestedMessage": "Heartbeat"}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");
    assert!(csms.wait_for_call("CP003", "Heartbeat", WAIT).await.is_some());

    let answer = csms
        .send_call("CP003", "FooBar", json!({}), CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answer["status"], "NotSupported");

    let err = csms
        .send_call("CP003", "RemoteStartTransaction", json!({"connectorId": "one"}), CALL_TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, OcppError::Protocol { ref code, .. } if code == "FormationViolation"));
}

#[tokio::test]
async fn v16_unlock_stops_running_transaction() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP004", OcppVersion::V16);
    station.connect(None).await.unwrap();
    station.start_charging(2, "TAG1").await.unwrap();

    let answer = csms
        .send_call("CP004", "UnlockConnector", json!({"connectorId": 2}), CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answer["status"], "Unlocked");

    let stop = csms.wait_for_call("CP004", "StopTransaction", WAIT).await.unwrap();
    assert_eq!(stop.payload["reason"], "UnlockCommand");
}

#[tokio::test]
async fn v201_request_start_and_variables() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "EVSE01", OcppVersion::V201);
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    let answer = csms
        .send_call(
            "EVSE01",
            "RequestStartTransaction",
            json!({"evseId": 1, "remoteStartId": 77, "idToken": {"idToken": "TOKEN", "type": "ISO14443"}}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");

    let started = match next_event(&mut events, |e| matches!(e, Event::ChargingStarted(_))).await {
        Event::ChargingStarted(e) => e.transaction,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(started.remote_start_id, Some(77));

    let event = csms.wait_for_call("EVSE01", "TransactionEvent", WAIT).await.unwrap();
    assert_eq!(event.payload["triggerReason"], "RemoteStart");
    assert_eq!(event.payload["transactionInfo"]["remoteStartId"], 77);

    let answer = csms
        .send_call(
            "EVSE01",
            "GetVariables",
            json!({"getVariableData": [
                {"component": {"name": "OCPPCommCtrlr"}, "variable": {"name": "HeartbeatInterval"}},
                {"component": {"name": "Nope"}, "variable": {"name": "Nothing"}}
            ]}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    let results = answer["getVariableResult"].as_array().unwrap();
    assert_eq!(results[0]["attributeStatus"], "Accepted");
    assert_eq!(results[1]["attributeStatus"], "UnknownComponent");

    let answer = csms
        .send_call(
            "EVSE01",
            "RequestStopTransaction",
            json!({"transactionId": started.transaction_id.to_string()}),
            CALL_TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");
    assert!(csms.wait_for_calls("EVSE01", "TransactionEvent", 2, WAIT).await);

    let stopped = match next_event(&mut events, |e| matches!(e, Event::ChargingStopped(_))).await {
        Event::ChargingStopped(e) => e.transaction,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(stopped.stop_reason, Some(StopReason::Remote));
}

#[tokio::test]
async fn v201_immediate_reset_reboots() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "EVSE02", OcppVersion::V201);
    station.connect(None).await.unwrap();
    station.start_charging(1, "TOKEN").await.unwrap();

    let answer = csms
        .send_call("EVSE02", "Reset", json!({"type": "Immediate"}), CALL_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answer["status"], "Accepted");

    assert!(csms.wait_for_calls("EVSE02", "BootNotification", 2, WAIT).await);
    assert!(csms.wait_for_calls("EVSE02", "TransactionEvent", 2, WAIT).await);
    let ended = csms.calls_for("EVSE02", "TransactionEvent").pop().unwrap();
    assert_eq!(ended.payload["eventType"], "Ended");

    let snapshot = station.snapshot().await;
    assert!(snapshot.connectors.iter().all(|c| c.active_transaction.is_none()));
}
