//! Station registry
//!
//! Owns every simulated station and funnels their events into one bus.
//! Each station gets a forwarder task; removing the station cancels it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::simulated_station::Station;
use crate::config::SimulatorSettings;
use crate::domain::{
    BootOutcome, StationConfig, StationError, StationResult, StationSnapshot, StopReason,
    Transaction,
};
use crate::notifications::{EventBus, EventSubscriber, MANAGER_BUS_CAPACITY};

/// Options for [`StationManager::connect_station`].
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Overrides the configured CSMS URL.
    pub csms_url: Option<String>,
}

pub struct StationManager {
    stations: DashMap<String, Arc<Station>>,
    forwarders: DashMap<String, CancellationToken>,
    events: EventBus,
    settings: SimulatorSettings,
    root: CancellationToken,
}

impl StationManager {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self {
            stations: DashMap::new(),
            forwarders: DashMap::new(),
            events: EventBus::with_capacity(MANAGER_BUS_CAPACITY),
            settings,
            root: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Register a new station. Duplicate ids are rejected.
    pub fn create_station(&self, config: StationConfig) -> StationResult<Arc<Station>> {
        let station_id = config.station_id.clone();
        let station = match self.stations.entry(station_id.clone()) {
            Entry::Occupied(_) => return Err(StationError::Duplicate(station_id)),
            Entry::Vacant(slot) => {
                let station = Arc::new(Station::new(config, self.settings.clone())?);
                slot.insert(station.clone());
                station
            }
        };

        self.spawn_forwarder(&station);
        info!(station_id = %station_id, total = self.stations.len(), "➕ Station registered");
        Ok(station)
    }

    /// Same as [`create_station`](Self::create_station) for a loosely-typed
    /// JSON configuration.
    pub fn create_station_from_json(&self, config: Value) -> StationResult<Arc<Station>> {
        self.create_station(StationConfig::from_json(config)?)
    }

    fn spawn_forwarder(&self, station: &Station) {
        let token = self.root.child_token();
        if let Some(previous) = self.forwarders.insert(station.id().to_string(), token.clone()) {
            previous.cancel();
        }

        let mut events = station.subscribe();
        let bus = self.events.clone();
        let station_id = station.id().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = events.recv() => match msg {
                        Some(msg) => bus.publish_message(msg),
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
            debug!(station_id = %station_id, "Event forwarder stopped");
        });
    }

    pub fn station(&self, station_id: &str) -> StationResult<Arc<Station>> {
        self.stations
            .get(station_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| StationError::NotFound(station_id.to_string()))
    }

    pub async fn connect_station(
        &self,
        station_id: &str,
        params: ConnectParams,
    ) -> StationResult<BootOutcome> {
        let station = self.station(station_id)?;
        Ok(station.connect(params.csms_url).await?)
    }

    pub async fn disconnect_station(&self, station_id: &str) -> StationResult<()> {
        self.station(station_id)?.disconnect().await;
        Ok(())
    }

    /// Disconnect the station, then evict it.
    pub async fn remove_station(&self, station_id: &str) -> StationResult<()> {
        let station = self.station(station_id)?;
        station.shutdown().await;

        self.stations.remove(station_id);
        if let Some((_, forwarder)) = self.forwarders.remove(station_id) {
            forwarder.cancel();
        }
        info!(station_id, total = self.stations.len(), "➖ Station removed");
        Ok(())
    }

    pub async fn send_command(
        &self,
        station_id: &str,
        action: &str,
        payload: Value,
    ) -> StationResult<Value> {
        let station = self.station(station_id)?;
        Ok(station.send_command(action, payload).await?)
    }

    pub async fn start_charging(
        &self,
        station_id: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> StationResult<Transaction> {
        let station = self.station(station_id)?;
        Ok(station.start_charging(connector_id, id_tag).await?)
    }

    pub async fn stop_charging(
        &self,
        station_id: &str,
        connector_id: u32,
        reason: StopReason,
    ) -> StationResult<Transaction> {
        let station = self.station(station_id)?;
        Ok(station.stop_charging(connector_id, reason).await?)
    }

    pub async fn get_station(&self, station_id: &str) -> StationResult<StationSnapshot> {
        Ok(self.station(station_id)?.snapshot().await)
    }

    /// Snapshots of every station, ordered by id.
    pub async fn list_stations(&self) -> Vec<StationSnapshot> {
        let stations: Vec<Arc<Station>> = self.stations.iter().map(|s| s.value().clone()).collect();
        let mut snapshots = join_all(stations.iter().map(|s| s.snapshot())).await;
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Events of every station.
    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    pub fn count(&self) -> usize {
        self.stations.len()
    }

    /// Shut down and remove every station.
    pub async fn close(&self) {
        let ids: Vec<String> = self.stations.iter().map(|s| s.key().clone()).collect();
        info!(count = ids.len(), "Closing station manager");
        join_all(ids.iter().map(|id| self.remove_station(id))).await;
        self.root.cancel();
    }
}

impl Drop for StationManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
