//! State shared by every component of one station
//!
//! The protocol handler, the charging controller and the connection manager
//! all hold an `Arc<StationContext>`. Connector state sits behind a single
//! async mutex; it is never held across a network call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use super::commands::StationCommand;
use crate::application::session::OcppSession;
use crate::config::SimulatorSettings;
use crate::domain::{ChargePoint, OcppVersion, StationConfig};
use crate::notifications::{ErrorEvent, Event, EventBus};

pub struct StationContext {
    pub config: StationConfig,
    pub settings: SimulatorSettings,
    pub session: Arc<OcppSession>,
    pub charge_point: Mutex<ChargePoint>,
    pub events: EventBus,
    commands: mpsc::UnboundedSender<StationCommand>,
    soft_reset_pending: AtomicBool,
}

impl StationContext {
    pub fn new(
        config: StationConfig,
        settings: SimulatorSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<StationCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let session = Arc::new(OcppSession::new(
            config.station_id.clone(),
            config.ocpp_version,
            settings.call_timeout,
        ));
        let ctx = Arc::new(Self {
            charge_point: Mutex::new(ChargePoint::new(config.connector_count)),
            config,
            settings,
            session,
            events: EventBus::new(),
            commands,
            soft_reset_pending: AtomicBool::new(false),
        });
        (ctx, rx)
    }

    pub fn station_id(&self) -> &str {
        &self.config.station_id
    }

    pub fn version(&self) -> OcppVersion {
        self.config.ocpp_version
    }

    /// Queue work for the station worker. Returns `false` once the worker
    /// has shut down.
    pub fn enqueue(&self, command: StationCommand) -> bool {
        debug!(station_id = %self.station_id(), command = command.name(), "Queued station command");
        self.commands.send(command).is_ok()
    }

    pub fn publish(&self, event: Event) {
        self.events.publish(event);
    }

    /// Log and broadcast an error that does not belong to a single caller.
    pub fn report_error(&self, message: impl Into<String>, fatal: bool) {
        let message = message.into();
        error!(station_id = %self.station_id(), fatal, "{}", message);
        self.publish(Event::Error(ErrorEvent {
            station_id: self.station_id().to_string(),
            message,
            fatal,
        }));
    }

    pub fn schedule_soft_reset(&self) {
        self.soft_reset_pending.store(true, Ordering::SeqCst);
    }

    /// Take a deferred soft reset, if one was requested.
    pub fn take_soft_reset(&self) -> bool {
        self.soft_reset_pending.swap(false, Ordering::SeqCst)
    }

    pub fn soft_reset_pending(&self) -> bool {
        self.soft_reset_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::station::commands::ResetKind;

    #[tokio::test]
    async fn new_context_builds_connectors_and_queue() {
        let config = StationConfig::new("CP001", OcppVersion::V16, "ws://localhost:9000/ocpp")
            .with_connectors(3);
        let (ctx, mut rx) = StationContext::new(config, SimulatorSettings::default());

        assert_eq!(ctx.charge_point.lock().await.connectors().len(), 3);
        assert_eq!(ctx.session.station_id(), "CP001");

        assert!(ctx.enqueue(StationCommand::Reset(ResetKind::Hard)));
        assert_eq!(rx.recv().await, Some(StationCommand::Reset(ResetKind::Hard)));

        drop(rx);
        assert!(!ctx.enqueue(StationCommand::Reset(ResetKind::Soft)));
    }

    #[tokio::test]
    async fn report_error_publishes_event() {
        let config = StationConfig::new("CP001", OcppVersion::V201, "ws://localhost:9000/ocpp");
        let (ctx, _rx) = StationContext::new(config, SimulatorSettings::default());
        let mut sub = ctx.events.subscribe();

        ctx.report_error("boom", true);

        let msg = sub.recv().await.unwrap();
        match msg.event {
            Event::Error(e) => {
                assert_eq!(e.message, "boom");
                assert!(e.fatal);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn soft_reset_flag_is_taken_once() {
        let config = StationConfig::new("CP001", OcppVersion::V16, "ws://localhost:9000/ocpp");
        let (ctx, _rx) = StationContext::new(config, SimulatorSettings::default());
        ctx.schedule_soft_reset();
        assert!(ctx.soft_reset_pending());
        assert!(ctx.take_soft_reset());
        assert!(!ctx.take_soft_reset());
    }
}
