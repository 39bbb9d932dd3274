//! Pending-call registry
//!
//! Correlates outbound CALLs with the CALLRESULT / CALLERROR that answers
//! them. Each entry is resolved exactly once: by a response, by its
//! deadline, or by [`PendingCallRegistry::cancel_all`]. Whichever path
//! removes the entry from the map owns the resolution.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::shared::{OcppError, OcppFrame};

/// Default time a caller waits for a response.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

type Responder = oneshot::Sender<Result<Value, OcppError>>;

struct PendingCall {
    action: String,
    sent_at: Instant,
    responder: Responder,
}

/// Removes the entry if the waiting future is dropped early.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingCall>,
    message_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.message_id);
    }
}

pub struct PendingCallRegistry {
    /// Station id (or peer id on the CSMS side), for logs only
    owner: String,
    pending: DashMap<String, PendingCall>,
}

impl PendingCallRegistry {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            pending: DashMap::new(),
        }
    }

    /// Register a CALL, hand its encoded text to `send`, and wait for the
    /// answer.
    ///
    /// `send` failing removes the entry and returns the error untouched.
    pub async fn call<F>(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
        send: F,
    ) -> Result<Value, OcppError>
    where
        F: FnOnce(String) -> Result<(), OcppError>,
    {
        let message_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();

        self.pending.insert(
            message_id.clone(),
            PendingCall {
                action: action.to_string(),
                sent_at: Instant::now(),
                responder: tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            message_id: &message_id,
        };

        debug!(
            owner = %self.owner,
            action,
            message_id = %message_id,
            "Sending call"
        );
        send(OcppFrame::call(message_id.as_str(), action, payload).serialize())?;
        metrics::counter!("ocpp_calls_total", "action" => action.to_string()).increment(1);

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::Cancelled(format!("{action} call abandoned"))),
            Err(_) => {
                if self.pending.remove(&message_id).is_some() {
                    warn!(
                        owner = %self.owner,
                        action,
                        message_id = %message_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Call timed out"
                    );
                    metrics::counter!("ocpp_call_timeouts_total", "action" => action.to_string())
                        .increment(1);
                    Err(OcppError::Timeout {
                        action: action.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // A response won the race against the deadline
                    rx.try_recv().unwrap_or_else(|_| {
                        Err(OcppError::Cancelled(format!("{action} call abandoned")))
                    })
                }
            }
        }
    }

    /// Deliver a CALLRESULT. Returns `false` for unknown ids.
    pub fn resolve(&self, message_id: &str, payload: Value) -> bool {
        match self.pending.remove(message_id) {
            Some((_, call)) => {
                let elapsed = call.sent_at.elapsed();
                debug!(
                    owner = %self.owner,
                    action = %call.action,
                    message_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Received response"
                );
                metrics::histogram!("ocpp_call_latency_seconds", "action" => call.action)
                    .record(elapsed.as_secs_f64());
                let _ = call.responder.send(Ok(payload));
                true
            }
            None => {
                warn!(owner = %self.owner, message_id, "Response for unknown request");
                false
            }
        }
    }

    /// Deliver a CALLERROR. Returns `false` for unknown ids.
    pub fn reject(
        &self,
        message_id: &str,
        code: &str,
        description: &str,
        details: Value,
    ) -> bool {
        match self.pending.remove(message_id) {
            Some((_, call)) => {
                warn!(
                    owner = %self.owner,
                    action = %call.action,
                    message_id,
                    error_code = code,
                    error_description = description,
                    "Received error"
                );
                let _ = call.responder.send(Err(OcppError::Protocol {
                    code: code.to_string(),
                    description: description.to_string(),
                    details,
                }));
                true
            }
            None => {
                warn!(owner = %self.owner, message_id, error_code = code, "Error for unknown request");
                false
            }
        }
    }

    /// Fail every waiting call with [`OcppError::Cancelled`].
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call
                    .responder
                    .send(Err(OcppError::Cancelled(reason.to_string())));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(owner = %self.owner, cancelled, reason, "Cancelled pending calls");
        }
        cancelled
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
