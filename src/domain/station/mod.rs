//! Simulated station value objects

pub mod model;

pub use model::{BootOutcome, BootStatus, StationConfig, StationSnapshot, StationStatus};
