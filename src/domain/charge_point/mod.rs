//! Charge point aggregate
//!
//! Connectors, their status machine and the transactions they carry.

pub mod model;

pub use model::{AvailabilityChange, ChargePoint, Connector, ConnectorStatus};
