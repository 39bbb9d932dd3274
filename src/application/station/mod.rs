//! Simulated stations
//!
//! - [`Station`]: one charge point with its CSMS link and transactions
//! - [`StationManager`]: registry of stations and the merged event stream
//! - [`ConnectionManager`]: connect, boot, heartbeat and reconnect
//! - [`ChargingController`]: transaction lifecycle and meter sampling

pub mod charging;
pub mod commands;
pub mod connection_manager;
pub mod context;
pub mod manager;
pub mod meter;
pub mod simulated_station;

pub use charging::ChargingController;
pub use commands::{ResetKind, StationCommand, TriggerKind};
pub use connection_manager::ConnectionManager;
pub use context::StationContext;
pub use manager::{ConnectParams, StationManager};
pub use meter::MeterSampler;
pub use simulated_station::Station;
