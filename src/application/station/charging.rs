//! Transaction lifecycle of a simulated station
//!
//! Local state changes happen first under the charge point lock and fail
//! without touching the network. The CSMS is told afterwards; a failed
//! report is logged and broadcast but never rolls back local state.

use std::sync::Arc;

use tracing::{info, warn};

use super::commands::{ResetKind, StationCommand};
use super::context::StationContext;
use super::meter::MeterSampler;
use crate::application::handlers::{ProtocolHandler, SharedProtocolHandler};
use crate::domain::{ConnectorStatus, StopReason, Transaction};
use crate::notifications::{ChargingEvent, ConnectorStatusChangedEvent, Event};
use crate::shared::OcppError;

#[derive(Clone)]
pub struct ChargingController {
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    meters: Arc<MeterSampler>,
}

impl ChargingController {
    pub fn new(
        ctx: Arc<StationContext>,
        handler: SharedProtocolHandler,
        meters: Arc<MeterSampler>,
    ) -> Self {
        Self {
            ctx,
            handler,
            meters,
        }
    }

    pub fn meters(&self) -> &MeterSampler {
        &self.meters
    }

    /// Begin a transaction on `connector_id` and report it to the CSMS.
    ///
    /// Returns the transaction as it stands after the report. When the CSMS
    /// refuses the id tag and `StopTransactionOnInvalidId` is set, the
    /// transaction is stopped right away and the closed transaction is
    /// returned.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
        remote_start_id: Option<i32>,
    ) -> Result<Transaction, OcppError> {
        let (tx, previous) = {
            let mut cp = self.ctx.charge_point.lock().await;
            let previous = cp.connector(connector_id)?.status;
            let mut tx = cp.begin_transaction(connector_id, id_tag)?;
            if remote_start_id.is_some() {
                cp.transaction_mut(connector_id)?.remote_start_id = remote_start_id;
                tx.remote_start_id = remote_start_id;
            }
            (tx, previous)
        };

        info!(
            station_id = %self.ctx.station_id(),
            connector_id,
            transaction_id = tx.transaction_id,
            id_tag,
            "🔌 Transaction started"
        );

        let mut authorized = true;
        let mut server_id = None;
        match self.handler.report_transaction_started(&tx).await {
            Ok(ack) => {
                authorized = ack.authorized;
                server_id = ack.transaction_id;
            }
            Err(e) => self.ctx.report_error(
                format!("Transaction start on connector {connector_id} not reported: {e}"),
                false,
            ),
        }

        // The connector was unlocked while the CSMS answered; a stop may
        // have closed this transaction in the meantime.
        let still_running = {
            let mut cp = self.ctx.charge_point.lock().await;
            let ours = cp
                .active_transaction(connector_id)
                .is_some_and(|active| same_session(active, &tx));
            if ours {
                if let Some(server_id) = server_id {
                    if cp.assign_transaction_id(connector_id, server_id).is_ok() {
                        info!(
                            station_id = %self.ctx.station_id(),
                            connector_id,
                            local_id = tx.transaction_id,
                            transaction_id = server_id,
                            "CSMS assigned transaction id"
                        );
                    }
                }
                Ok(cp.active_transaction(connector_id).cloned().unwrap_or_else(|| tx.clone()))
            } else {
                Err(cp
                    .connector(connector_id)?
                    .last_transaction
                    .clone()
                    .filter(|closed| same_session(closed, &tx))
                    .unwrap_or_else(|| tx.clone()))
            }
        };

        let current = match still_running {
            Ok(current) => current,
            Err(closed) => {
                info!(
                    station_id = %self.ctx.station_id(),
                    connector_id,
                    transaction_id = closed.transaction_id,
                    "Transaction ended before its start was acknowledged"
                );
                return Ok(closed);
            }
        };

        self.notify_status(connector_id, previous, ConnectorStatus::Charging)
            .await;

        if !authorized && self.handler.stop_on_invalid_id().await {
            warn!(
                station_id = %self.ctx.station_id(),
                connector_id,
                id_tag,
                "Id tag refused by CSMS, stopping transaction"
            );
            return self
                .stop_transaction(connector_id, StopReason::DeAuthorized)
                .await;
        }

        self.meters.start(connector_id);
        self.ctx.publish(Event::ChargingStarted(ChargingEvent {
            station_id: self.ctx.station_id().to_string(),
            connector_id,
            transaction: current.clone(),
        }));
        Ok(current)
    }

    /// Close the transaction on `connector_id` and report it.
    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        reason: StopReason,
    ) -> Result<Transaction, OcppError> {
        let (tx, previous, status) = {
            let mut cp = self.ctx.charge_point.lock().await;
            let previous = cp.connector(connector_id)?.status;
            let tx = cp.end_transaction(connector_id, reason)?;
            let status = cp.connector(connector_id)?.status;
            (tx, previous, status)
        };
        self.meters.stop(connector_id);

        info!(
            station_id = %self.ctx.station_id(),
            connector_id,
            transaction_id = tx.transaction_id,
            reason = reason.as_str(),
            energy_wh = tx.energy_consumed(),
            "🛑 Transaction stopped"
        );

        if let Err(e) = self.handler.report_transaction_stopped(&tx).await {
            self.ctx.report_error(
                format!(
                    "Transaction {} stop not reported: {e}",
                    tx.transaction_id
                ),
                false,
            );
        }

        self.notify_status(connector_id, previous, status).await;

        self.ctx.publish(Event::ChargingStopped(ChargingEvent {
            station_id: self.ctx.station_id().to_string(),
            connector_id,
            transaction: tx.clone(),
        }));

        if self.ctx.soft_reset_pending() && !self.has_active_transactions().await {
            info!(station_id = %self.ctx.station_id(), "Last transaction ended, running deferred reset");
            self.ctx.enqueue(StationCommand::Reset(ResetKind::Soft));
        }

        Ok(tx)
    }

    /// Stop every running transaction with `reason`.
    pub async fn stop_all(&self, reason: StopReason) -> Vec<Transaction> {
        let active = self.ctx.charge_point.lock().await.active_connectors();
        let mut stopped = Vec::with_capacity(active.len());
        for connector_id in active {
            match self.stop_transaction(connector_id, reason).await {
                Ok(tx) => stopped.push(tx),
                Err(e) => warn!(
                    station_id = %self.ctx.station_id(),
                    connector_id,
                    error = %e,
                    "Could not stop transaction"
                ),
            }
        }
        stopped
    }

    /// Change a connector status locally, then tell the CSMS.
    pub async fn set_connector_status(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OcppError> {
        let previous = self
            .ctx
            .charge_point
            .lock()
            .await
            .set_status(connector_id, status)?;
        self.notify_status(connector_id, previous, status).await;
        Ok(())
    }

    /// Broadcast a status change (if any) and send StatusNotification.
    pub async fn notify_status(
        &self,
        connector_id: u32,
        previous: ConnectorStatus,
        status: ConnectorStatus,
    ) {
        if previous != status {
            self.ctx
                .publish(Event::ConnectorStatusChanged(ConnectorStatusChangedEvent {
                    station_id: self.ctx.station_id().to_string(),
                    connector_id,
                    previous,
                    status,
                }));
        }

        if let Err(e) = self
            .handler
            .send_status_notification(connector_id, status)
            .await
        {
            warn!(
                station_id = %self.ctx.station_id(),
                connector_id,
                status = status.as_str(),
                error = %e,
                "StatusNotification failed"
            );
        }
    }

    /// Resume sampling for transactions that survived a disconnect.
    pub async fn resume_meters(&self) {
        let active = self.ctx.charge_point.lock().await.active_connectors();
        for connector_id in active {
            if !self.meters.is_sampling(connector_id) {
                self.meters.start(connector_id);
            }
        }
    }

    async fn has_active_transactions(&self) -> bool {
        !self.ctx.charge_point.lock().await.active_connectors().is_empty()
    }
}

/// Same charging session, whatever id the CSMS assigned since.
fn same_session(a: &Transaction, b: &Transaction) -> bool {
    a.connector_id == b.connector_id && a.start_time == b.start_time && a.id_tag == b.id_tag
}
