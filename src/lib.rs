//! # OCPP Station Simulator
//!
//! Simulated EV charging stations speaking OCPP 1.6J or 2.0.1 to a CSMS.
//!
//! ## Architecture
//!
//! - **domain**: charge points, connectors, transactions, station config
//! - **application**: protocol handlers, OCPP sessions, stations and the manager
//! - **interfaces**: WebSocket client and an in-process mock CSMS
//! - **notifications**: typed station events on a broadcast bus
//! - **runtime**: process lifecycle used by the CLI

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod notifications;
pub mod runtime;
pub mod shared;

pub use application::station::{ConnectParams, Station, StationManager};
pub use config::{default_config_path, AppConfig, SimulatorSettings};
pub use domain::{OcppVersion, StationConfig, StationError, StationResult};
pub use notifications::{Event, EventBus, EventMessage, EventSubscriber};
pub use shared::OcppError;
