//! Domain errors

use thiserror::Error;

use crate::shared::OcppError;

/// Errors returned by station-level and manager-level operations.
#[derive(Debug, Clone, Error)]
pub enum StationError {
    #[error("Station already exists: {0}")]
    Duplicate(String),

    #[error("Station not found: {0}")]
    NotFound(String),

    #[error("Invalid station config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Ocpp(#[from] OcppError),
}

pub type StationResult<T> = Result<T, StationError>;
