#![allow(dead_code)]

use std::time::Duration;

use ocpp_sim::interfaces::ws::MockCsms;
use ocpp_sim::notifications::Event;
use ocpp_sim::shared::ReconnectPolicy;
use ocpp_sim::{EventSubscriber, OcppVersion, SimulatorSettings, Station, StationConfig};

pub const WAIT: Duration = Duration::from_secs(5);

/// Short timings so failure paths finish quickly.
pub fn settings() -> SimulatorSettings {
    SimulatorSettings {
        call_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy::new(Duration::from_millis(50), 3),
        default_heartbeat_interval: Duration::from_secs(60),
        meter_sample_interval: Duration::from_secs(60),
        max_missed_heartbeats: 0,
    }
}

pub fn station_config(csms: &MockCsms, id: &str, version: OcppVersion) -> StationConfig {
    StationConfig::new(id, version, csms.url()).with_connectors(2)
}

pub fn station(csms: &MockCsms, id: &str, version: OcppVersion) -> Station {
    Station::new(station_config(csms, id, version), settings()).unwrap()
}

/// Next event matching `pred`, skipping the rest.
pub async fn next_event<F>(events: &mut EventSubscriber, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let msg = events.recv().await.expect("event bus closed");
            if pred(&msg.event) {
                return msg.event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
