//! Periodic meter sampling
//!
//! One sampling task per active transaction, each with its own
//! cancellation token under the station root. The cadence is read from the
//! protocol handler before every tick, so a CSMS-side change of the sample
//! interval applies from the next sample on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::StationContext;
use crate::application::handlers::{ProtocolHandler, SharedProtocolHandler};
use crate::domain::{MeterSample, Transaction};
use crate::notifications::{Event, MeterValuesEvent};
use crate::shared::OcppError;

const NOMINAL_VOLTAGE: f64 = 230.0;

/// Draw a sample for a connector charging at up to `max_power` watts for
/// `elapsed`, starting from register value `meter_now`.
pub fn simulate_sample(max_power: f64, elapsed: Duration, meter_now: u64) -> MeterSample {
    let factor: f64 = rand::thread_rng().gen_range(0.85..=1.0);
    let power_w = (max_power * factor).max(0.0);
    let delivered_wh = power_w * elapsed.as_secs_f64() / 3600.0;

    MeterSample {
        timestamp: Utc::now(),
        energy_wh: meter_now + delivered_wh.round() as u64,
        power_w,
        voltage_v: NOMINAL_VOLTAGE,
        current_a: power_w / NOMINAL_VOLTAGE,
    }
}

pub struct MeterSampler {
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    root: CancellationToken,
    tasks: Arc<DashMap<u32, CancellationToken>>,
}

impl MeterSampler {
    pub fn new(
        ctx: Arc<StationContext>,
        handler: SharedProtocolHandler,
        root: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            handler,
            root,
            tasks: Arc::new(DashMap::new()),
        }
    }

    /// Start sampling `connector_id`, replacing any running task for it.
    pub fn start(&self, connector_id: u32) {
        let token = self.root.child_token();
        if let Some(previous) = self.tasks.insert(connector_id, token.clone()) {
            previous.cancel();
        }

        debug!(station_id = %self.ctx.station_id(), connector_id, "Meter sampling started");
        let tasks = self.tasks.clone();
        let ctx = self.ctx.clone();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            run_sampling_loop(ctx, handler, connector_id, token.clone()).await;
            // A loop that ended on its own leaves no live entry behind.
            // A replacement task holds a fresh token and is kept.
            token.cancel();
            tasks.remove_if(&connector_id, |_, current| current.is_cancelled());
        });
    }

    pub fn stop(&self, connector_id: u32) {
        if let Some((_, token)) = self.tasks.remove(&connector_id) {
            token.cancel();
            debug!(station_id = %self.ctx.station_id(), connector_id, "Meter sampling stopped");
        }
    }

    pub fn stop_all(&self) {
        let connectors: Vec<u32> = self.tasks.iter().map(|e| *e.key()).collect();
        for connector_id in connectors {
            self.stop(connector_id);
        }
    }

    pub fn is_sampling(&self, connector_id: u32) -> bool {
        self.tasks
            .get(&connector_id)
            .is_some_and(|t| !t.is_cancelled())
    }

    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_cancelled()).count()
    }

    /// Sample a connector once, outside the periodic schedule. Used by
    /// TriggerMessage(MeterValues).
    pub async fn sample_now(&self, connector_id: u32) -> Result<(), OcppError> {
        let (tx, sample) = take_sample(&self.ctx, connector_id, Duration::ZERO).await?;
        publish_sample(&self.ctx, &self.handler, &tx, sample).await;
        Ok(())
    }
}

/// Advance the connector's register and return the updated transaction.
async fn take_sample(
    ctx: &StationContext,
    connector_id: u32,
    elapsed: Duration,
) -> Result<(Transaction, MeterSample), OcppError> {
    let mut cp = ctx.charge_point.lock().await;
    let meter_now = cp
        .active_transaction(connector_id)
        .ok_or(OcppError::NoActiveTransaction(connector_id))?
        .meter_now;
    let sample = simulate_sample(ctx.config.power_per_connector(), elapsed, meter_now);
    let tx = cp.record_meter(connector_id, sample.energy_wh)?;
    Ok((tx, sample))
}

async fn publish_sample(
    ctx: &StationContext,
    handler: &SharedProtocolHandler,
    tx: &Transaction,
    sample: MeterSample,
) {
    match handler.report_meter_values(tx, &sample).await {
        Ok(()) => {}
        Err(OcppError::NotConnected) | Err(OcppError::Cancelled(_)) => {
            debug!(
                station_id = %ctx.station_id(),
                connector_id = tx.connector_id,
                "MeterValues not sent, no connection"
            );
        }
        Err(e) => {
            warn!(
                station_id = %ctx.station_id(),
                connector_id = tx.connector_id,
                error = %e,
                "MeterValues report failed"
            );
        }
    }

    ctx.publish(Event::MeterValues(MeterValuesEvent {
        station_id: ctx.station_id().to_string(),
        connector_id: tx.connector_id,
        transaction_id: tx.transaction_id,
        values: sample,
    }));
}

async fn run_sampling_loop(
    ctx: Arc<StationContext>,
    handler: SharedProtocolHandler,
    connector_id: u32,
    token: CancellationToken,
) {
    loop {
        let interval = handler.meter_sample_interval().await;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let (tx, sample) = match take_sample(&ctx, connector_id, interval).await {
            Ok(taken) => taken,
            Err(e) => {
                debug!(station_id = %ctx.station_id(), connector_id, error = %e, "Meter sampling ends");
                break;
            }
        };

        info!(
            station_id = %ctx.station_id(),
            connector_id,
            energy_wh = sample.energy_wh,
            power_w = sample.power_w,
            "⚡ Meter sample"
        );
        publish_sample(&ctx, &handler, &tx, sample).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::create_protocol_handler;
    use crate::config::SimulatorSettings;
    use crate::domain::{OcppVersion, StationConfig};

    #[test]
    fn sample_stays_within_power_band() {
        let sample = simulate_sample(7_000.0, Duration::from_secs(3600), 1_000);
        assert!(sample.power_w >= 7_000.0 * 0.85 && sample.power_w <= 7_000.0);
        assert!(sample.energy_wh >= 1_000 + 5_950 && sample.energy_wh <= 1_000 + 7_000);
        assert!((sample.current_a - sample.power_w / 230.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_keeps_register() {
        let sample = simulate_sample(11_000.0, Duration::ZERO, 42);
        assert_eq!(sample.energy_wh, 42);
    }

    fn sampler() -> (Arc<StationContext>, MeterSampler) {
        let config = StationConfig::new("CP001", OcppVersion::V16, "ws://localhost:9000/ocpp")
            .with_connectors(2)
            .with_max_power(22_000.0);
        let mut settings = SimulatorSettings::default();
        settings.meter_sample_interval = Duration::from_secs(10);
        let (ctx, _rx) = StationContext::new(config, settings);
        let handler = create_protocol_handler(OcppVersion::V16, ctx.clone());
        let sampler = MeterSampler::new(ctx.clone(), handler, CancellationToken::new());
        (ctx, sampler)
    }

    #[tokio::test(start_paused = true)]
    async fn samples_advance_register_while_offline() {
        let (ctx, sampler) = sampler();
        ctx.charge_point
            .lock()
            .await
            .begin_transaction(1, "TAG1")
            .unwrap();
        let mut events = ctx.events.subscribe();

        sampler.start(1);
        assert!(sampler.is_sampling(1));

        let msg = events.recv().await.unwrap();
        let Event::MeterValues(e) = msg.event else {
            panic!("expected meter values, got {:?}", msg.event);
        };
        assert_eq!(e.connector_id, 1);
        assert!(e.values.energy_wh > 0);

        let cp = ctx.charge_point.lock().await;
        assert_eq!(cp.active_transaction(1).unwrap().meter_now, e.values.energy_wh);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_task() {
        let (ctx, sampler) = sampler();
        ctx.charge_point
            .lock()
            .await
            .begin_transaction(2, "TAG2")
            .unwrap();

        sampler.start(2);
        assert_eq!(sampler.active_count(), 1);
        sampler.stop_all();
        assert_eq!(sampler.active_count(), 0);
        assert!(!sampler.is_sampling(2));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_that_outlives_its_transaction_stops_sampling() {
        let (ctx, sampler) = sampler();
        ctx.charge_point
            .lock()
            .await
            .begin_transaction(1, "TAG1")
            .unwrap();
        sampler.start(1);
        assert!(sampler.is_sampling(1));

        // Closed behind the sampler's back, as a reset would
        ctx.charge_point
            .lock()
            .await
            .end_transaction(1, crate::domain::StopReason::HardReset)
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(!sampler.is_sampling(1));
        assert_eq!(sampler.active_count(), 0);

        // A new transaction on the connector can be sampled again
        ctx.charge_point
            .lock()
            .await
            .begin_transaction(1, "TAG2")
            .unwrap();
        sampler.start(1);
        assert!(sampler.is_sampling(1));
    }

    #[tokio::test]
    async fn sample_now_requires_transaction() {
        let (_ctx, sampler) = sampler();
        assert!(matches!(
            sampler.sample_now(1).await,
            Err(OcppError::NoActiveTransaction(1))
        ));
    }
}
