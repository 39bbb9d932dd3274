//! CSMS link of one station
//!
//! ```text
//! Disconnected → Connecting → Connected → (Disconnected | Reconnecting) → Connecting → …
//!                                           Reconnecting ×N → Error
//! ```
//!
//! Every successful `connect` owns a *link* token, child of the station
//! root. Each socket opened under the link gets its own *connection* token;
//! the heartbeat and the socket reader hang off it. Losing the socket cancels
//! the connection token only, the link survives for the reconnect loop.
//! An explicit `disconnect` cancels the link, which also stops any pending
//! reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::StationContext;
use crate::application::handlers::{ProtocolHandler, SharedProtocolHandler};
use crate::domain::{BootOutcome, BootStatus, StationStatus};
use crate::interfaces::ws::ocpp_client::{self, CloseInfo};
use crate::notifications::{ConnectedEvent, DisconnectedEvent, Event, ReconnectingEvent};
use crate::shared::OcppError;

/// Close code used for a local, intentional disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A live socket: its token and the signal that fires when it dies.
struct Established {
    outcome: BootOutcome,
    connection: CancellationToken,
    closed: oneshot::Receiver<CloseInfo>,
}

#[derive(Default)]
struct LinkState {
    link: Option<CancellationToken>,
    url: Option<String>,
}

pub struct ConnectionManager {
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    root: CancellationToken,
    status: watch::Sender<StationStatus>,
    link: Mutex<LinkState>,
    last_error: std::sync::Mutex<Option<String>>,
}

impl ConnectionManager {
    pub fn new(
        ctx: Arc<StationContext>,
        handler: SharedProtocolHandler,
        root: CancellationToken,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(StationStatus::Disconnected);
        Arc::new(Self {
            ctx,
            handler,
            root,
            status,
            link: Mutex::new(LinkState::default()),
            last_error: std::sync::Mutex::new(None),
        })
    }

    pub fn status(&self) -> StationStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn watch_status(&self) -> watch::Receiver<StationStatus> {
        self.status.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .map(|e| (*e).clone())
            .unwrap_or_default()
    }

    fn set_status(&self, status: StationStatus) {
        self.status.send_replace(status);
    }

    fn record_error(&self, message: String) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message);
        }
    }

    /// Open the socket, boot, and start the heartbeat.
    ///
    /// `csms_url` overrides the configured CSMS URL for this and later
    /// reconnects. Fails with `BootRejected` when the CSMS rejects the
    /// BootNotification; in that case no heartbeat runs.
    pub async fn connect(self: &Arc<Self>, csms_url: Option<String>) -> Result<BootOutcome, OcppError> {
        let mut state = self.link.lock().await;
        if state.link.as_ref().is_some_and(|l| !l.is_cancelled()) {
            return Err(OcppError::InvalidState(format!(
                "station {} is already connected",
                self.ctx.station_id()
            )));
        }

        let base = csms_url
            .or_else(|| state.url.clone())
            .unwrap_or_else(|| self.ctx.config.csms_url.clone());
        let url = ocpp_client::build_station_url(&base, self.ctx.station_id());
        let link = self.root.child_token();

        self.set_status(StationStatus::Connecting);
        info!(station_id = %self.ctx.station_id(), url = %url, "Connecting to CSMS");

        match self.establish(&url, &link).await {
            Ok(established) => {
                let outcome = established.outcome.clone();
                state.link = Some(link.clone());
                state.url = Some(base);
                drop(state);

                tokio::spawn(self.clone().supervise(url, link, established));
                Ok(outcome)
            }
            Err(e) => {
                link.cancel();
                self.set_status(StationStatus::Disconnected);
                self.record_error(e.to_string());
                self.ctx.report_error(format!("Connect failed: {e}"), false);
                Err(e)
            }
        }
    }

    /// Close the socket with a normal closure and stop reconnecting.
    pub async fn disconnect(&self) {
        self.disconnect_with(NORMAL_CLOSURE, "Normal closure").await;
    }

    pub async fn disconnect_with(&self, code: u16, reason: &str) {
        let link = self.link.lock().await.link.take();
        let Some(link) = link else {
            return;
        };

        self.ctx.session.close(code, reason).await;
        link.cancel();
        self.handler.stop_heartbeat().await;
        let was_attached = self.ctx.session.detach("disconnected").await;
        self.set_status(StationStatus::Disconnected);

        info!(station_id = %self.ctx.station_id(), code, reason, "Disconnected from CSMS");
        if was_attached {
            self.publish_disconnected(code, reason);
        }
    }

    /// Drop the socket and connect again (used by Reset).
    pub async fn restart(self: &Arc<Self>, reason: &str) -> Result<BootOutcome, OcppError> {
        self.disconnect_with(NORMAL_CLOSURE, reason).await;
        self.connect(None).await
    }

    async fn establish(
        &self,
        url: &str,
        link: &CancellationToken,
    ) -> Result<Established, OcppError> {
        let settings = &self.ctx.settings;
        let version = self.ctx.version();

        let ws = tokio::time::timeout(settings.connect_timeout, ocpp_client::open(url, version))
            .await
            .map_err(|_| {
                OcppError::Connection(format!(
                    "no handshake within {} ms",
                    settings.connect_timeout.as_millis()
                ))
            })??;

        // A disconnect issued during the handshake wins over the new socket.
        if link.is_cancelled() {
            debug!(station_id = %self.ctx.station_id(), "Link closed during handshake, dropping socket");
            return Err(OcppError::Cancelled("link closed during handshake".into()));
        }

        let connection = link.child_token();
        let (sender, closed) = ocpp_client::spawn_io(ws, self.handler.clone(), connection.clone());
        self.ctx.session.attach(sender).await;

        let outcome = match self.handler.boot().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.teardown(&connection, "boot failed").await;
                return Err(e);
            }
        };

        if outcome.status == BootStatus::Rejected {
            warn!(station_id = %self.ctx.station_id(), "❌ BootNotification rejected");
            self.ctx.session.close(NORMAL_CLOSURE, "Boot rejected").await;
            self.teardown(&connection, "boot rejected").await;
            return Err(OcppError::BootRejected);
        }

        let interval = self.heartbeat_interval(&outcome).await;
        self.handler.start_heartbeat(interval, &connection).await;
        self.set_status(StationStatus::Connected);

        info!(
            station_id = %self.ctx.station_id(),
            boot_status = outcome.status.as_str(),
            heartbeat_secs = interval.as_secs(),
            "✅ Connected to CSMS"
        );
        self.ctx.publish(Event::Connected(ConnectedEvent {
            station_id: self.ctx.station_id().to_string(),
            protocol: version,
            boot_status: outcome.status,
            heartbeat_interval: interval.as_secs(),
        }));

        tokio::spawn(announce_connectors(self.ctx.clone(), self.handler.clone()));

        Ok(Established {
            outcome,
            connection,
            closed,
        })
    }

    /// Boot interval if the CSMS sent one, else the last known one, else
    /// the configured default.
    async fn heartbeat_interval(&self, outcome: &BootOutcome) -> Duration {
        if let Some(secs) = outcome.interval.filter(|s| *s > 0) {
            return Duration::from_secs(secs);
        }
        if let Some(last) = self.handler.core().heartbeat.interval().await {
            return last;
        }
        self.ctx
            .config
            .heartbeat_interval
            .map(Duration::from_secs)
            .unwrap_or(self.ctx.settings.default_heartbeat_interval)
    }

    async fn teardown(&self, connection: &CancellationToken, reason: &str) {
        connection.cancel();
        self.handler.stop_heartbeat().await;
        self.ctx.session.detach(reason).await;
    }

    fn publish_disconnected(&self, code: u16, reason: &str) {
        self.ctx.publish(Event::Disconnected(DisconnectedEvent {
            station_id: self.ctx.station_id().to_string(),
            code,
            reason: reason.to_string(),
        }));
    }

    /// Watch the socket of `link` and reconnect whenever it drops.
    async fn supervise(self: Arc<Self>, url: String, link: CancellationToken, first: Established) {
        let mut current = first;
        loop {
            let info = tokio::select! {
                _ = link.cancelled() => return,
                info = &mut current.closed => {
                    info.unwrap_or_else(|_| CloseInfo::abnormal("socket tasks stopped"))
                }
            };
            if link.is_cancelled() {
                return;
            }

            warn!(
                station_id = %self.ctx.station_id(),
                code = info.code,
                reason = %info.reason,
                "Connection to CSMS lost"
            );
            self.teardown(&current.connection, "connection lost").await;
            self.publish_disconnected(info.code, &info.reason);

            match self.reconnect(&url, &link).await {
                Some(next) => current = next,
                None => return,
            }
        }
    }

    async fn reconnect(&self, url: &str, link: &CancellationToken) -> Option<Established> {
        let policy = self.ctx.settings.reconnect;

        for attempt in 1..=policy.max_attempts {
            let Some(delay) = policy.delay_for(attempt) else {
                break;
            };

            self.set_status(StationStatus::Reconnecting);
            metrics::counter!("ocpp_reconnect_attempts_total").increment(1);
            info!(
                station_id = %self.ctx.station_id(),
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "🔄 Reconnecting"
            );
            self.ctx.publish(Event::Reconnecting(ReconnectingEvent {
                station_id: self.ctx.station_id().to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            }));

            tokio::select! {
                _ = link.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_status(StationStatus::Connecting);
            match self.establish(url, link).await {
                Ok(established) if link.is_cancelled() => {
                    established.connection.cancel();
                    return None;
                }
                Ok(established) => {
                    info!(station_id = %self.ctx.station_id(), attempt, "Reconnected");
                    return Some(established);
                }
                Err(e) => {
                    warn!(station_id = %self.ctx.station_id(), attempt, error = %e, "Reconnect attempt failed");
                    self.record_error(e.to_string());
                }
            }
        }

        if link.is_cancelled() {
            return None;
        }

        let exhausted = OcppError::ReconnectExhausted(policy.max_attempts);
        error!(station_id = %self.ctx.station_id(), "{}", exhausted);
        self.set_status(StationStatus::Error);
        self.record_error(exhausted.to_string());
        self.ctx.report_error(exhausted.to_string(), true);

        // Give up the link so an explicit connect() is accepted again.
        self.link.lock().await.link.take();
        link.cancel();
        None
    }
}

/// Send StatusNotification for every connector after boot.
async fn announce_connectors(ctx: Arc<StationContext>, handler: SharedProtocolHandler) {
    let statuses: Vec<_> = ctx
        .charge_point
        .lock()
        .await
        .connectors()
        .iter()
        .map(|c| (c.id, c.status))
        .collect();

    for (connector_id, status) in statuses {
        if let Err(e) = handler.send_status_notification(connector_id, status).await {
            warn!(
                station_id = %ctx.station_id(),
                connector_id,
                error = %e,
                "Initial StatusNotification failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::create_protocol_handler;
    use crate::config::SimulatorSettings;
    use crate::domain::{OcppVersion, StationConfig};
    use crate::interfaces::ws::MockCsms;
    use crate::shared::ReconnectPolicy;

    fn manager(url: &str) -> Arc<ConnectionManager> {
        let config = StationConfig::new("CP001", OcppVersion::V16, url);
        let mut settings = SimulatorSettings::default();
        settings.connect_timeout = Duration::from_secs(2);
        settings.reconnect = ReconnectPolicy::new(Duration::from_millis(10), 2);
        let (ctx, _rx) = StationContext::new(config, settings);
        let handler = create_protocol_handler(OcppVersion::V16, ctx.clone());
        ConnectionManager::new(ctx, handler, CancellationToken::new())
    }

    #[tokio::test]
    async fn unreachable_csms_fails_connect() {
        // Port 9 (discard) is closed on test machines.
        let cm = manager("ws://127.0.0.1:9/ocpp");
        let result = cm.connect(None).await;
        assert!(matches!(result, Err(OcppError::Connection(_))));
        assert_eq!(cm.status(), StationStatus::Disconnected);
        assert!(cm.last_error().is_some());
    }

    #[tokio::test]
    async fn closed_link_never_attaches_new_socket() {
        let csms = MockCsms::start().await.unwrap();
        let cm = manager(&csms.url());
        let url = ocpp_client::build_station_url(&csms.url(), "CP001");
        let link = CancellationToken::new();
        link.cancel();

        let result = cm.establish(&url, &link).await;

        assert!(matches!(result, Err(OcppError::Cancelled(_))));
        assert!(!cm.ctx.session.is_attached().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(csms.count_calls("CP001", "BootNotification"), 0);
        assert_ne!(cm.status(), StationStatus::Connected);
    }

    #[tokio::test]
    async fn disconnect_without_link_is_noop() {
        let cm = manager("ws://127.0.0.1:9/ocpp");
        cm.disconnect().await;
        assert_eq!(cm.status(), StationStatus::Disconnected);
    }
}
