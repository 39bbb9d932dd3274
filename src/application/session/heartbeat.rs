//! Heartbeat scheduling
//!
//! One timer task per connected station. The task is a child of the
//! connection token, so it dies with the socket. A failed heartbeat is only
//! logged; `max_missed` consecutive timeouts cancel the connection token,
//! which the read loop reports as a lost socket.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ocpp_session::OcppSession;
use crate::notifications::{Event, EventBus, HeartbeatEvent};
use crate::shared::OcppError;

#[derive(Default)]
struct HeartbeatState {
    interval: Option<Duration>,
    task: Option<CancellationToken>,
    connection: Option<CancellationToken>,
}

pub struct HeartbeatScheduler {
    session: Arc<OcppSession>,
    events: EventBus,
    state: Mutex<HeartbeatState>,
    last_heartbeat: Arc<Mutex<Option<DateTime<Utc>>>>,
    max_missed: u32,
}

impl HeartbeatScheduler {
    pub fn new(session: Arc<OcppSession>, events: EventBus, max_missed: u32) -> Self {
        Self {
            session,
            events,
            state: Mutex::new(HeartbeatState::default()),
            last_heartbeat: Arc::new(Mutex::new(None)),
            max_missed,
        }
    }

    /// Start (or restart) the loop for the connection behind `connection`.
    pub async fn start(&self, interval: Duration, connection: &CancellationToken) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.cancel();
        }
        state.interval = Some(interval);
        state.connection = Some(connection.clone());

        if interval.is_zero() {
            info!(station_id = %self.session.station_id(), "Heartbeat disabled (interval 0)");
            return;
        }

        let task = connection.child_token();
        state.task = Some(task.clone());

        info!(
            station_id = %self.session.station_id(),
            interval_secs = interval.as_secs(),
            "💓 Heartbeat started"
        );

        tokio::spawn(run_heartbeat_loop(
            self.session.clone(),
            self.events.clone(),
            self.last_heartbeat.clone(),
            interval,
            task,
            connection.clone(),
            self.max_missed,
        ));
    }

    /// Apply a new interval. Restarts the loop if one is running.
    pub async fn reschedule(&self, interval: Duration) {
        let connection = {
            let mut state = self.state.lock().await;
            state.interval = Some(interval);
            match (&state.task, &state.connection) {
                (Some(_), Some(conn)) if !conn.is_cancelled() => Some(conn.clone()),
                _ => None,
            }
        };
        if let Some(connection) = connection {
            self.start(interval, &connection).await;
        }
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.task.take() {
            task.cancel();
            debug!(station_id = %self.session.station_id(), "Heartbeat stopped");
        }
        state.connection = None;
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .lock()
            .await
            .task
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Last interval in effect, kept across reconnects.
    pub async fn interval(&self) -> Option<Duration> {
        self.state.lock().await.interval
    }

    pub async fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.lock().await
    }

    /// Send one heartbeat right now.
    pub async fn beat(&self) -> Result<DateTime<Utc>, OcppError> {
        send_heartbeat(&self.session, &self.events, &self.last_heartbeat).await
    }
}

async fn send_heartbeat(
    session: &OcppSession,
    events: &EventBus,
    last_heartbeat: &Mutex<Option<DateTime<Utc>>>,
) -> Result<DateTime<Utc>, OcppError> {
    // Heartbeat has the same shape in 1.6 and 2.0.1.
    let payload = serde_json::to_value(HeartbeatRequest {})
        .map_err(|e| OcppError::invalid_payload("Heartbeat", e))?;
    let response = session.call("Heartbeat", payload).await?;
    let HeartbeatResponse {
        current_time: timestamp,
    } = serde_json::from_value(response)
        .map_err(|e| OcppError::invalid_payload("Heartbeat", e))?;

    *last_heartbeat.lock().await = Some(timestamp);
    events.publish(Event::Heartbeat(HeartbeatEvent {
        station_id: session.station_id().to_string(),
        timestamp,
    }));
    Ok(timestamp)
}

async fn run_heartbeat_loop(
    session: Arc<OcppSession>,
    events: EventBus,
    last_heartbeat: Arc<Mutex<Option<DateTime<Utc>>>>,
    interval: Duration,
    task: CancellationToken,
    connection: CancellationToken,
    max_missed: u32,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut missed = 0u32;

    loop {
        tokio::select! {
            _ = task.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = task.cancelled() => break,
            result = send_heartbeat(&session, &events, &last_heartbeat) => result,
        };

        match result {
            Ok(_) => missed = 0,
            Err(OcppError::Timeout { .. }) => {
                missed += 1;
                warn!(
                    station_id = %session.station_id(),
                    missed,
                    "Heartbeat timed out"
                );
                if max_missed > 0 && missed >= max_missed {
                    warn!(
                        station_id = %session.station_id(),
                        missed,
                        "Too many missed heartbeats, dropping connection"
                    );
                    connection.cancel();
                    break;
                }
            }
            Err(e) => {
                warn!(station_id = %session.station_id(), error = %e, "Heartbeat failed");
            }
        }
    }

    debug!(station_id = %session.station_id(), "Heartbeat loop exited");
}
