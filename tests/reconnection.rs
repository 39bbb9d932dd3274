mod common;

use std::time::Duration;

use common::{next_event, settings, station, station_config, WAIT};
use ocpp_sim::domain::StationStatus;
use ocpp_sim::interfaces::ws::{ConnectionProfile, MockCsms};
use ocpp_sim::notifications::Event;
use ocpp_sim::{OcppVersion, Station};

#[tokio::test]
async fn dropped_socket_is_reestablished() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP001", OcppVersion::V16);
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    assert!(csms.drop_connection("CP001"));

    match next_event(&mut events, |e| matches!(e, Event::Disconnected(_))).await {
        Event::Disconnected(e) => assert_eq!(e.code, 1006),
        other => panic!("unexpected {other:?}"),
    }
    match next_event(&mut events, |e| matches!(e, Event::Reconnecting(_))).await {
        Event::Reconnecting(e) => {
            assert_eq!(e.attempt, 1);
            assert_eq!(e.delay_ms, 50);
        }
        other => panic!("unexpected {other:?}"),
    }
    next_event(&mut events, |e| matches!(e, Event::Connected(_))).await;

    assert!(csms.wait_for_handshakes("CP001", 2, WAIT).await);
    assert_eq!(csms.count_calls("CP001", "BootNotification"), 2);
    assert_eq!(station.status(), StationStatus::Connected);
}

#[tokio::test]
async fn close_frame_from_csms_also_reconnects() {
    let csms = MockCsms::start().await.unwrap();
    let station = station(&csms, "CP002", OcppVersion::V201);
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    assert!(csms.disconnect("CP002", 1001, "going away"));
    match next_event(&mut events, |e| matches!(e, Event::Disconnected(_))).await {
        Event::Disconnected(e) => assert_eq!(e.code, 1001),
        other => panic!("unexpected {other:?}"),
    }
    assert!(csms.wait_for_handshakes("CP002", 2, WAIT).await);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let csms = MockCsms::start().await.unwrap();
    let mut settings = settings();
    settings.reconnect = ocpp_sim::shared::ReconnectPolicy::new(Duration::from_millis(50), 5);
    let station = Station::new(station_config(&csms, "CP003", OcppVersion::V16), settings).unwrap();
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    csms.shutdown();

    let mut delays = Vec::new();
    let fatal = loop {
        match next_event(&mut events, |e| matches!(e, Event::Reconnecting(_) | Event::Error(_))).await {
            Event::Reconnecting(e) => delays.push(e.delay_ms),
            Event::Error(e) if e.fatal => break e,
            _ => {}
        }
    };

    assert_eq!(delays, [50, 100, 150, 200, 250]);
    assert!(fatal.message.contains("5"));
    assert_eq!(station.status(), StationStatus::Error);

    // Nothing more happens once the station has given up
    let connections = csms.connection_count("CP003");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(csms.connection_count("CP003"), connections);
    assert_eq!(station.status(), StationStatus::Error);

    let mut later_fatal = 0;
    while let Some(msg) = events.try_recv() {
        match msg.event {
            Event::Error(e) if e.fatal => later_fatal += 1,
            Event::Reconnecting(e) => panic!("reconnect attempt {} after giving up", e.attempt),
            _ => {}
        }
    }
    assert_eq!(later_fatal, 0, "exactly one fatal error is reported");
}

#[tokio::test]
async fn explicit_disconnect_stops_reconnecting() {
    let csms = MockCsms::start().await.unwrap();
    let mut settings = settings();
    settings.reconnect = ocpp_sim::shared::ReconnectPolicy::new(Duration::from_secs(1), 5);
    let station = Station::new(station_config(&csms, "CP004", OcppVersion::V16), settings).unwrap();
    let mut events = station.subscribe();
    station.connect(None).await.unwrap();

    csms.drop_connection("CP004");
    next_event(&mut events, |e| matches!(e, Event::Reconnecting(_))).await;

    station.disconnect().await;
    assert_eq!(station.status(), StationStatus::Disconnected);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(csms.connection_count("CP004"), 1);
}

#[tokio::test]
async fn missed_heartbeats_drop_the_socket() {
    let csms = MockCsms::start().await.unwrap();
    csms.set_boot_response("Accepted", 1).await;

    let mut settings = settings();
    settings.call_timeout = Duration::from_millis(200);
    settings.max_missed_heartbeats = 2;
    let station = Station::new(station_config(&csms, "CP005", OcppVersion::V16), settings).unwrap();
    station.connect(None).await.unwrap();
    assert!(csms.wait_for_calls("CP005", "StatusNotification", 2, WAIT).await);

    csms.set_connection_profile(
        "CP005",
        ConnectionProfile::Intermittent {
            disconnect_probability: 0.0,
            message_drop_probability: 1.0,
        },
    );
    assert!(csms.wait_for_disconnection("CP005", WAIT).await);

    csms.set_connection_profile("CP005", ConnectionProfile::Stable);
    assert!(csms.wait_for_handshakes("CP005", 2, WAIT).await);
}
