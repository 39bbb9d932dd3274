//! Charging profile aggregate

pub mod model;

pub use model::{ChargingProfile, ChargingProfileStore, ProfileCriteria, ProfileRejection};
