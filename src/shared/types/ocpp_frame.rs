//! OCPP-J message framing
//!
//! The JSON-over-WebSocket envelope is the same for OCPP 1.6J and 2.0.1:
//!
//! - **Call**       `[2, "<messageId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<messageId>", {<payload>}]`
//! - **CallError**  `[4, "<messageId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Decoding only checks the envelope (array, message type, id). Payload schemas
//! are the protocol handler's concern.

use serde_json::{json, Value};
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Shortest valid envelope: `[3, id, payload]`.
const MIN_FRAME_LEN: usize = 3;

// ── OcppFrame ──────────────────────────────────────────────────

/// A decoded OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, messageId, action, payload]`
    Call {
        message_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, messageId, payload]`
    CallResult { message_id: String, payload: Value },
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`
    CallError {
        message_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Decoding ───────────────────────────────────────────

    /// Decode a raw text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let arr = value.as_array().ok_or(FrameError::NotAnArray)?;

        if arr.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(arr.len()));
        }

        let msg_type = arr[0].as_u64().ok_or(FrameError::InvalidMessageType)?;

        let message_id = arr[1]
            .as_str()
            .ok_or(FrameError::InvalidMessageId)?
            .to_string();

        match msg_type {
            MSG_TYPE_CALL => {
                let action = arr[2]
                    .as_str()
                    .ok_or(FrameError::InvalidAction)?
                    .to_string();
                let payload = arr.get(3).cloned().unwrap_or_else(|| json!({}));
                Ok(Self::Call {
                    message_id,
                    action,
                    payload,
                })
            }
            MSG_TYPE_CALL_RESULT => Ok(Self::CallResult {
                message_id,
                payload: arr[2].clone(),
            }),
            MSG_TYPE_CALL_ERROR => Ok(Self::CallError {
                message_id,
                error_code: arr[2].as_str().unwrap_or("GenericError").to_string(),
                error_description: arr
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                error_details: arr.get(4).cloned().unwrap_or_else(|| json!({})),
            }),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    // ── Encoding ───────────────────────────────────────────

    /// Encode this frame as the JSON text sent on the wire.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, message_id, action, payload]),
            Self::CallResult {
                message_id,
                payload,
            } => json!([MSG_TYPE_CALL_RESULT, message_id, payload]),
            Self::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                message_id,
                error_code,
                error_description,
                error_details
            ]),
        };

        arr.to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    pub fn call(message_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(message_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Create a `CallError` response for a given message id.
    pub fn error_response(
        message_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Envelope-level decoding failures. The frame is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame is not a JSON array")]
    NotAnArray,

    #[error("Expected at least 3 elements, got {0}")]
    TooShort(usize),

    #[error("Message type is not a number")]
    InvalidMessageType,

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("Message id must be a string")]
    InvalidMessageId,

    #[error("Action must be a string")]
    InvalidAction,
}
