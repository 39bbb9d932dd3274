mod common;

use std::time::Duration;

use common::{settings, station_config};
use ocpp_sim::interfaces::ws::{Fault, Latency, MockCsms};
use ocpp_sim::{OcppError, OcppVersion, Station};
use serde_json::json;

#[tokio::test]
async fn slow_csms_times_out_and_late_answer_is_dropped() {
    let csms = MockCsms::start().await.unwrap();
    let mut settings = settings();
    settings.call_timeout = Duration::from_millis(150);
    let station = Station::new(station_config(&csms, "CP001", OcppVersion::V16), settings).unwrap();
    station.connect(None).await.unwrap();
    assert!(csms.wait_for_calls("CP001", "StatusNotification", 2, Duration::from_secs(5)).await);

    csms.set_latency(Some(Latency { min_ms: 400, max_ms: 400 })).await;
    let err = station.send_command("Heartbeat", json!({})).await.unwrap_err();
    assert!(matches!(err, OcppError::Timeout { ref action, timeout_ms: 150 } if action == "Heartbeat"));

    // The late answer arrives while nothing waits for it.
    tokio::time::sleep(Duration::from_millis(400)).await;
    csms.set_latency(None).await;

    let answer = station.send_command("Heartbeat", json!({})).await.unwrap();
    assert!(answer["currentTime"].is_string());
    assert!(csms.is_connected("CP001"), "a timeout never drops the socket");
}

#[tokio::test]
async fn call_error_reaches_the_caller_only() {
    let csms = MockCsms::start().await.unwrap();
    let station = Station::new(station_config(&csms, "CP002", OcppVersion::V201), settings()).unwrap();
    station.connect(None).await.unwrap();

    csms.inject_fault(Fault::CallError {
        action: Some("DataTransfer".to_string()),
        code: "InternalError".to_string(),
        description: "boom".to_string(),
    });

    let err = station
        .send_command("DataTransfer", json!({"vendorId": "acme"}))
        .await
        .unwrap_err();
    match err {
        OcppError::Protocol { code, description, .. } => {
            assert_eq!(code, "InternalError");
            assert_eq!(description, "boom");
        }
        other => panic!("unexpected {other:?}"),
    }

    // One-shot: the next call goes through.
    station
        .send_command("DataTransfer", json!({"vendorId": "acme"}))
        .await
        .unwrap();
    assert!(csms.is_connected("CP002"));
}

#[tokio::test]
async fn disconnect_cancels_in_flight_calls() {
    let csms = MockCsms::start().await.unwrap();
    let station = std::sync::Arc::new(
        Station::new(station_config(&csms, "CP003", OcppVersion::V16), settings()).unwrap(),
    );
    station.connect(None).await.unwrap();
    csms.set_latency(Some(Latency { min_ms: 1_000, max_ms: 1_000 })).await;

    let caller = {
        let station = station.clone();
        tokio::spawn(async move { station.send_command("Heartbeat", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    station.disconnect().await;

    let result = caller.await.unwrap();
    assert!(matches!(result, Err(OcppError::Cancelled(_))));
}
