//! One simulated charging station
//!
//! Ties the protocol handler, the connection manager and the charging
//! controller together and runs the station worker: the task that executes
//! [`StationCommand`]s queued by inbound CSMS requests.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::charging::ChargingController;
use super::commands::{ResetKind, StationCommand, TriggerKind};
use super::connection_manager::ConnectionManager;
use super::context::StationContext;
use super::meter::MeterSampler;
use crate::application::handlers::{create_protocol_handler, ProtocolHandler, SharedProtocolHandler};
use crate::config::SimulatorSettings;
use crate::domain::{
    BootOutcome, ConnectorStatus, OcppVersion, StationConfig, StationError, StationSnapshot,
    StationStatus, StopReason, Transaction,
};
use crate::notifications::{EventBus, EventSubscriber};
use crate::shared::OcppError;

pub struct Station {
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    connection: Arc<ConnectionManager>,
    charging: ChargingController,
    root: CancellationToken,
}

impl Station {
    /// Validate `config` and build the station. Spawns the station worker,
    /// so it must be called inside a Tokio runtime.
    pub fn new(config: StationConfig, settings: SimulatorSettings) -> Result<Self, StationError> {
        config.check()?;

        let root = CancellationToken::new();
        let version = config.ocpp_version;
        let (ctx, commands) = StationContext::new(config, settings);
        let handler = create_protocol_handler(version, ctx.clone());
        let connection = ConnectionManager::new(ctx.clone(), handler.clone(), root.clone());
        let meters = Arc::new(MeterSampler::new(ctx.clone(), handler.clone(), root.clone()));
        let charging = ChargingController::new(ctx.clone(), handler.clone(), meters);

        let worker = StationWorker {
            ctx: ctx.clone(),
            handler: handler.clone(),
            connection: connection.clone(),
            charging: charging.clone(),
        };
        tokio::spawn(worker.run(commands, root.child_token()));

        info!(
            station_id = %ctx.station_id(),
            version = %version,
            connectors = ctx.config.connector_count,
            "Station created"
        );

        Ok(Self {
            ctx,
            handler,
            connection,
            charging,
            root,
        })
    }

    pub fn id(&self) -> &str {
        self.ctx.station_id()
    }

    pub fn version(&self) -> OcppVersion {
        self.ctx.version()
    }

    pub fn config(&self) -> &StationConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &Arc<StationContext> {
        &self.ctx
    }

    pub fn handler(&self) -> &SharedProtocolHandler {
        &self.handler
    }

    pub fn status(&self) -> StationStatus {
        self.connection.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<StationStatus> {
        self.connection.watch_status()
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.ctx.events.subscribe()
    }

    pub async fn connect(&self, csms_url: Option<String>) -> Result<BootOutcome, OcppError> {
        let outcome = self.connection.connect(csms_url).await?;
        self.charging.resume_meters().await;
        Ok(outcome)
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
        self.charging.meters().stop_all();
    }

    pub async fn start_charging(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<Transaction, OcppError> {
        self.charging
            .start_transaction(connector_id, id_tag, None)
            .await
    }

    pub async fn stop_charging(
        &self,
        connector_id: u32,
        reason: StopReason,
    ) -> Result<Transaction, OcppError> {
        self.charging.stop_transaction(connector_id, reason).await
    }

    pub async fn set_connector_status(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OcppError> {
        self.charging.set_connector_status(connector_id, status).await
    }

    /// Send an arbitrary CALL and wait for its answer.
    pub async fn send_command(&self, action: &str, payload: Value) -> Result<Value, OcppError> {
        self.handler.send_command(action, payload, None).await
    }

    pub async fn snapshot(&self) -> StationSnapshot {
        let connectors = self.ctx.charge_point.lock().await.connectors().to_vec();
        StationSnapshot {
            id: self.id().to_string(),
            protocol_version: self.version(),
            status: self.status(),
            boot_status: self.handler.core().boot_status().await,
            connectors,
            config: self.ctx.config.clone(),
            last_heartbeat: self.handler.core().heartbeat.last_heartbeat().await,
            last_error: self.connection.last_error(),
        }
    }

    /// Disconnect, stop every task and fail all pending calls.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.root.cancel();
        let cancelled = self.ctx.session.pending().cancel_all("station removed");
        debug!(station_id = %self.id(), cancelled, "Station shut down");
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

// ── Worker ─────────────────────────────────────────────────────

struct StationWorker {
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    connection: Arc<ConnectionManager>,
    charging: ChargingController,
}

impl StationWorker {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<StationCommand>, token: CancellationToken) {
        loop {
            let command = tokio::select! {
                _ = token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!(station_id = %self.ctx.station_id(), command = command.name(), "Running station command");
            self.execute(command).await;
        }
        debug!(station_id = %self.ctx.station_id(), "Station worker stopped");
    }

    async fn execute(&self, command: StationCommand) {
        match command {
            StationCommand::StartTransaction {
                connector_id,
                id_tag,
                remote_start_id,
            } => {
                if self.handler.authorize_remote_start().await && !self.authorize(&id_tag).await {
                    return;
                }
                if let Err(e) = self
                    .charging
                    .start_transaction(connector_id, &id_tag, remote_start_id)
                    .await
                {
                    warn!(station_id = %self.ctx.station_id(), connector_id, error = %e, "Remote start failed");
                }
            }
            StationCommand::StopTransaction {
                connector_id,
                reason,
            } => {
                if let Err(e) = self.charging.stop_transaction(connector_id, reason).await {
                    warn!(station_id = %self.ctx.station_id(), connector_id, error = %e, "Remote stop failed");
                }
            }
            StationCommand::StatusChanged {
                connector_id,
                previous,
                status,
            } => {
                self.charging
                    .notify_status(connector_id, previous, status)
                    .await;
            }
            StationCommand::Reset(kind) => self.reset(kind).await,
            StationCommand::Trigger {
                message,
                connector_id,
            } => self.trigger(message, connector_id).await,
        }
    }

    async fn authorize(&self, id_tag: &str) -> bool {
        match self.handler.authorize(id_tag).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(station_id = %self.ctx.station_id(), id_tag, "Id tag not authorized, remote start dropped");
                false
            }
            Err(e) => {
                warn!(station_id = %self.ctx.station_id(), id_tag, error = %e, "Authorize failed, remote start dropped");
                false
            }
        }
    }

    async fn reset(&self, kind: ResetKind) {
        match kind {
            ResetKind::Hard => {
                let stopped = self.charging.stop_all(kind.stop_reason()).await;
                info!(station_id = %self.ctx.station_id(), stopped = stopped.len(), "Hard reset");
            }
            ResetKind::Soft => {
                let active = self.ctx.charge_point.lock().await.active_connectors();
                if !active.is_empty() {
                    info!(
                        station_id = %self.ctx.station_id(),
                        active = active.len(),
                        "Soft reset deferred until transactions end"
                    );
                    self.ctx.schedule_soft_reset();
                    return;
                }
                self.ctx.take_soft_reset();
                info!(station_id = %self.ctx.station_id(), "Soft reset");
            }
        }

        self.charging.meters().stop_all();
        match self.connection.restart("Reset").await {
            Ok(_) => self.charging.resume_meters().await,
            Err(e) => self
                .ctx
                .report_error(format!("Reconnect after reset failed: {e}"), false),
        }
    }

    async fn trigger(&self, message: TriggerKind, connector_id: Option<u32>) {
        match message {
            TriggerKind::BootNotification => {
                if let Err(e) = self.handler.boot().await {
                    warn!(station_id = %self.ctx.station_id(), error = %e, "Triggered BootNotification failed");
                }
            }
            TriggerKind::Heartbeat => {
                if let Err(e) = self.handler.core().heartbeat.beat().await {
                    warn!(station_id = %self.ctx.station_id(), error = %e, "Triggered Heartbeat failed");
                }
            }
            TriggerKind::StatusNotification => {
                let statuses: Vec<(u32, ConnectorStatus)> = {
                    let cp = self.ctx.charge_point.lock().await;
                    cp.connectors()
                        .iter()
                        .filter(|c| connector_id.map_or(true, |id| id == c.id))
                        .map(|c| (c.id, c.status))
                        .collect()
                };
                for (id, status) in statuses {
                    self.charging.notify_status(id, status, status).await;
                }
            }
            TriggerKind::MeterValues => {
                let targets = match connector_id {
                    Some(id) => vec![id],
                    None => self.ctx.charge_point.lock().await.active_connectors(),
                };
                for id in targets {
                    if let Err(e) = self.charging.meters().sample_now(id).await {
                        debug!(station_id = %self.ctx.station_id(), connector_id = id, error = %e, "No meter values to trigger");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Event;

    fn station() -> Station {
        let config = StationConfig::new("CP001", OcppVersion::V16, "ws://127.0.0.1:9/ocpp")
            .with_connectors(2);
        Station::new(config, SimulatorSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn new_validates_config() {
        let config = StationConfig::new("CP001", OcppVersion::V16, "http://nope");
        assert!(matches!(
            Station::new(config, SimulatorSettings::default()),
            Err(StationError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_of_fresh_station() {
        let station = station();
        let snapshot = station.snapshot().await;
        assert_eq!(snapshot.id, "CP001");
        assert_eq!(snapshot.status, StationStatus::Disconnected);
        assert_eq!(snapshot.connectors.len(), 2);
        assert!(snapshot.boot_status.is_none());
        assert!(snapshot.last_heartbeat.is_none());
    }

    #[tokio::test]
    async fn local_charging_works_offline() {
        let station = station();
        let tx = station.start_charging(1, "TAG1").await.unwrap();
        assert!(tx.is_active());

        let stopped = station.stop_charging(1, StopReason::Local).await.unwrap();
        assert!(stopped.stop_time.is_some());
        let snapshot = station.snapshot().await;
        assert_eq!(snapshot.connectors[0].status, ConnectorStatus::Available);
    }

    #[tokio::test]
    async fn worker_runs_queued_remote_stop() {
        let station = station();
        station.start_charging(2, "TAG1").await.unwrap();
        let mut events = station.subscribe();

        assert!(station.context().enqueue(StationCommand::StopTransaction {
            connector_id: 2,
            reason: StopReason::Remote,
        }));

        loop {
            let msg = events.recv().await.unwrap();
            if let Event::ChargingStopped(e) = msg.event {
                assert_eq!(e.connector_id, 2);
                assert_eq!(e.transaction.stop_reason, Some(StopReason::Remote));
                break;
            }
        }
    }

    #[tokio::test]
    async fn soft_reset_is_deferred_while_charging() {
        let station = station();
        station.start_charging(1, "TAG1").await.unwrap();
        let mut status = station.watch_status();

        station.context().enqueue(StationCommand::Reset(ResetKind::Soft));
        for _ in 0..50 {
            if station.context().soft_reset_pending() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(station.context().soft_reset_pending());
        assert!(!status.has_changed().unwrap());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let station = station();
        station.shutdown().await;
        station.shutdown().await;
        assert_eq!(station.status(), StationStatus::Disconnected);
    }
}
