pub mod charge_point;
pub mod charging_profile;
pub mod configuration;
pub mod error;
pub mod ocpp;
pub mod station;
pub mod transaction;

// Re-export commonly used types
pub use charge_point::{ChargePoint, Connector, ConnectorStatus};
pub use error::{StationError, StationResult};
pub use ocpp::OcppVersion;
pub use station::{BootOutcome, BootStatus, StationConfig, StationSnapshot, StationStatus};
pub use transaction::{MeterSample, StopReason, Transaction};
