//! Full charging session against the mock CSMS.

mod common;

use common::{next_event, station, WAIT};
use ocpp_sim::domain::{BootStatus, ConnectorStatus, StationStatus, StopReason};
use ocpp_sim::interfaces::ws::MockCsms;
use ocpp_sim::notifications::Event;
use ocpp_sim::{OcppError, OcppVersion};

#[tokio::test]
async fn faulted_connector_refuses_local_start() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP010", OcppVersion::V16);
    station.connect(None).await.unwrap();
    assert!(csms.wait_for_calls("CP010", "StatusNotification", 2, WAIT).await);

    station.set_connector_status(1, ConnectorStatus::Faulted).await.unwrap();
    assert!(csms.wait_for_calls("CP010", "StatusNotification", 3, WAIT).await);
    let faulted = csms.calls_for("CP010", "StatusNotification");
    assert_eq!(faulted.last().unwrap().payload["status"], "Faulted");

    let result = station.start_charging(1, "TAG1").await;
    assert!(matches!(result, Err(OcppError::InvalidState(_))), "got {result:?}");

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(csms.count_calls("CP010", "StartTransaction"), 0);
    assert_eq!(csms.count_calls("CP010", "StatusNotification"), 3);

    let snapshot = station.snapshot().await;
    let connector = snapshot.connectors.iter().find(|c| c.id == 1).unwrap();
    assert_eq!(connector.status, ConnectorStatus::Faulted);
    assert!(connector.active_transaction.is_none());
}

#[tokio::test]
async fn v16_session_start_to_stop() {
    let csms = MockCsms::start().await.unwrap();
    csms.set_boot_response("Accepted", 60).await;

    let station = station(&csms, "CP001", OcppVersion::V16);
    let mut events = station.subscribe();

    let outcome = station.connect(None).await.unwrap();
    assert_eq!(outcome.status, BootStatus::Accepted);
    assert_eq!(outcome.interval, Some(60));
    assert_eq!(station.status(), StationStatus::Connected);

    match next_event(&mut events, |e| matches!(e, Event::Connected(_))).await {
        Event::Connected(e) => {
            assert_eq!(e.protocol, OcppVersion::V16);
            assert_eq!(e.boot_status, BootStatus::Accepted);
            assert_eq!(e.heartbeat_interval, 60);
        }
        other => panic!("unexpected {other:?}"),
    }

    let boot = csms.wait_for_call("CP001", "BootNotification", WAIT).await.unwrap();
    assert_eq!(boot.payload["chargePointVendor"], "OcppSim");
    assert_eq!(csms.protocol_of("CP001"), Some(OcppVersion::V16));
    assert!(csms.wait_for_calls("CP001", "StatusNotification", 2, WAIT).await);

    let tx = station.start_charging(1, "TAG1").await.unwrap();
    assert!(tx.is_active());
    assert_eq!(tx.transaction_id, 1, "CSMS id replaces the local one");

    let start = csms.wait_for_call("CP001", "StartTransaction", WAIT).await.unwrap();
    assert_eq!(start.payload["connectorId"], 1);
    assert_eq!(start.payload["idTag"], "TAG1");

    let stopped = station.stop_charging(1, StopReason::Local).await.unwrap();
    assert!(stopped.stop_time.is_some());
    assert_eq!(stopped.stop_reason, Some(StopReason::Local));

    let stop = csms.wait_for_call("CP001", "StopTransaction", WAIT).await.unwrap();
    assert_eq!(stop.payload["transactionId"], 1);
    assert_eq!(stop.payload["reason"], "Local");

    let snapshot = station.snapshot().await;
    let connector = snapshot.connectors.iter().find(|c| c.id == 1).unwrap();
    assert_eq!(connector.status, ConnectorStatus::Available);
    assert!(connector.active_transaction.is_none());
    let closed = connector.last_transaction.as_ref().unwrap();
    assert!(closed.stop_time.is_some());

    match next_event(&mut events, |e| matches!(e, Event::ChargingStopped(_))).await {
        Event::ChargingStopped(e) => assert_eq!(e.transaction.transaction_id, 1),
        other => panic!("unexpected {other:?}"),
    }

    station.disconnect().await;
    assert_eq!(station.status(), StationStatus::Disconnected);
    assert!(csms.wait_for_disconnection("CP001", WAIT).await);
}

#[tokio::test]
async fn v201_session_uses_transaction_events() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "EVSE01", OcppVersion::V201);

    station.connect(None).await.unwrap();
    assert_eq!(csms.protocol_of("EVSE01"), Some(OcppVersion::V201));

    let tx = station.start_charging(2, "TOKEN-A").await.unwrap();
    let started = csms.wait_for_call("EVSE01", "TransactionEvent", WAIT).await.unwrap();
    assert_eq!(started.payload["eventType"], "Started");
    assert_eq!(started.payload["evse"]["id"], 2);
    assert_eq!(started.payload["idToken"]["idToken"], "TOKEN-A");
    assert_eq!(
        started.payload["transactionInfo"]["transactionId"],
        tx.transaction_id.to_string()
    );

    station.stop_charging(2, StopReason::Local).await.unwrap();
    assert!(csms.wait_for_calls("EVSE01", "TransactionEvent", 2, WAIT).await);
    let ended = csms.calls_for("EVSE01", "TransactionEvent").pop().unwrap();
    assert_eq!(ended.payload["eventType"], "Ended");
    assert_eq!(ended.payload["transactionInfo"]["stoppedReason"], "Local");

    station.shutdown().await;
}

#[tokio::test]
async fn blocked_tag_is_deauthorized() {
    let csms = MockCsms::start().await.unwrap();
    csms.block_id_tag("STOLEN");
    let station = station(&csms, "CP002", OcppVersion::V16);
    station.connect(None).await.unwrap();

    let tx = station.start_charging(1, "STOLEN").await.unwrap();
    assert!(!tx.is_active());
    assert_eq!(tx.stop_reason, Some(StopReason::DeAuthorized));

    let stop = csms.wait_for_call("CP002", "StopTransaction", WAIT).await.unwrap();
    assert_eq!(stop.payload["reason"], "DeAuthorized");
}
