use serde_json::Value;
use thiserror::Error;

use super::ocpp_frame::FrameError;

/// Errors produced by the protocol engine.
///
/// Per-call variants (`Timeout`, `Protocol`, `InvalidState`, ...) are returned to
/// the caller only. Connection-level failures are additionally broadcast as
/// station events.
#[derive(Debug, Clone, Error)]
pub enum OcppError {
    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("BootNotification rejected by CSMS")]
    BootRejected,

    #[error("No response to {action} within {timeout_ms} ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("CallError {code}: {description}")]
    Protocol {
        code: String,
        description: String,
        details: Value,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No active transaction on connector {0}")]
    NoActiveTransaction(u32),

    #[error("Unknown connector {0}")]
    UnknownConnector(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to CSMS")]
    NotConnected,

    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid {action} payload: {message}")]
    InvalidPayload { action: String, message: String },
}

impl OcppError {
    pub fn invalid_payload(action: &str, err: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            action: action.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether the error says something about the socket rather than the call.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            OcppError::Connection(_) | OcppError::NotConnected | OcppError::ReconnectExhausted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_convert() {
        let err: OcppError = FrameError::NotAnArray.into();
        assert!(matches!(err, OcppError::Frame(FrameError::NotAnArray)));
        assert!(!err.is_connection_level());
    }

    #[test]
    fn display_includes_call_error_code() {
        let err = OcppError::Protocol {
            code: "NotImplemented".into(),
            description: "nope".into(),
            details: Value::Null,
        };
        assert_eq!(err.to_string(), "CallError NotImplemented: nope");
    }
}
