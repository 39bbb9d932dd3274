//! Transaction aggregate

pub mod model;

pub use model::{MeterSample, StopReason, Transaction};
