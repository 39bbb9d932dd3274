//! Configuration keys and device-model variables

pub mod store;

pub use store::{ConfigEntry, ConfigStore, Mutability, SetOutcome, ValueKind, VariableKey};
