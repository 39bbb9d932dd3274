//! In-process mock CSMS
//!
//! Accepts station connections at `ws://127.0.0.1:<port>/<prefix>/{station_id}`,
//! answers station CALLs with canned responses and records every CALL it
//! receives. Tests and load runs steer it through [`MockControl`]: latency,
//! one-shot faults and a per-station connection profile.
//!
//! Nothing in the station engine depends on this module.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::negotiator::ProtocolNegotiator;
use crate::application::session::PendingCallRegistry;
use crate::domain::OcppVersion;
use crate::shared::{OcppError, OcppFrame};

// ── Controls ───────────────────────────────────────────────────

/// Answers the mock gives when no fault applies.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub boot_status: String,
    pub heartbeat_interval: u64,
    pub latency: Option<Latency>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            boot_status: "Accepted".to_string(),
            heartbeat_interval: 60,
            latency: None,
        }
    }
}

/// Uniformly drawn response delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Latency {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Latency {
    fn draw(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

/// A fault applied to the next matching CALL, then forgotten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Fault {
    /// Answer the next BootNotification with `Rejected`.
    RejectBoot,
    /// Answer with a CALLERROR. `action: None` matches any CALL.
    CallError {
        #[serde(default)]
        action: Option<String>,
        code: String,
        #[serde(default)]
        description: String,
    },
    /// Drop the socket without a close frame instead of answering.
    Disconnect,
}

impl Fault {
    fn matches(&self, action: &str) -> bool {
        match self {
            Fault::RejectBoot => action == "BootNotification",
            Fault::CallError { action: wanted, .. } => {
                wanted.as_deref().map_or(true, |a| a == action)
            }
            Fault::Disconnect => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionProfile {
    #[default]
    Stable,
    /// Each received CALL may drop the socket or go unanswered.
    #[serde(rename_all = "camelCase")]
    Intermittent {
        disconnect_probability: f64,
        message_drop_probability: f64,
    },
}

/// JSON form of the runtime controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "camelCase")]
pub enum MockControl {
    #[serde(rename_all = "camelCase")]
    Latency { min_ms: u64, max_ms: u64 },
    Error(Fault),
    #[serde(rename_all = "camelCase")]
    ConnectionState {
        station_id: String,
        #[serde(flatten)]
        profile: ConnectionProfile,
    },
}

/// A CALL received from a station.
#[derive(Debug, Clone)]
pub struct ReceivedCall {
    pub station_id: String,
    pub message_id: String,
    pub action: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

// ── State ──────────────────────────────────────────────────────

struct Peer {
    connection_id: u64,
    version: OcppVersion,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Arc<PendingCallRegistry>,
    token: CancellationToken,
}

struct MockState {
    negotiator: ProtocolNegotiator,
    behavior: RwLock<MockBehavior>,
    faults: std::sync::Mutex<Vec<Fault>>,
    profiles: DashMap<String, ConnectionProfile>,
    blocked_tags: DashSet<String>,
    peers: DashMap<String, Peer>,
    handshakes: DashMap<String, u32>,
    calls: std::sync::Mutex<Vec<ReceivedCall>>,
    /// Bumped on every recorded call and every connect/disconnect.
    changed: watch::Sender<u64>,
    next_connection_id: AtomicU64,
    next_transaction_id: AtomicI32,
}

impl MockState {
    fn touch(&self) {
        self.changed.send_modify(|generation| *generation += 1);
    }

    fn take_fault(&self, action: &str) -> Option<Fault> {
        let mut faults = self.faults.lock().ok()?;
        let index = faults.iter().position(|f| f.matches(action))?;
        Some(faults.remove(index))
    }

    fn record(&self, call: ReceivedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        self.touch();
    }
}

enum Reply {
    Respond(OcppFrame),
    Drop,
    Disconnect,
}

// ── MockCsms ───────────────────────────────────────────────────

pub struct MockCsms {
    addr: SocketAddr,
    path_prefix: String,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockCsms {
    /// Bind an ephemeral port on localhost and start accepting.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockBehavior::default()).await
    }

    pub async fn start_with(behavior: MockBehavior) -> std::io::Result<Self> {
        Self::bind("127.0.0.1:0", behavior).await
    }

    pub async fn bind(addr: &str, behavior: MockBehavior) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (changed, _) = watch::channel(0);

        let state = Arc::new(MockState {
            negotiator: ProtocolNegotiator::default(),
            behavior: RwLock::new(behavior),
            faults: std::sync::Mutex::new(Vec::new()),
            profiles: DashMap::new(),
            blocked_tags: DashSet::new(),
            peers: DashMap::new(),
            handshakes: DashMap::new(),
            calls: std::sync::Mutex::new(Vec::new()),
            changed,
            next_connection_id: AtomicU64::new(1),
            next_transaction_id: AtomicI32::new(1),
        });
        let shutdown = CancellationToken::new();

        info!("🔌 Mock CSMS listening on ws://{}/ocpp", addr);
        tokio::spawn(run_accept_loop(listener, state.clone(), shutdown.clone()));

        Ok(Self {
            addr,
            path_prefix: "ocpp".to_string(),
            state,
            shutdown,
        })
    }

    /// Base URL for station configs: `ws://<addr>/ocpp`.
    pub fn url(&self) -> String {
        format!("ws://{}/{}", self.addr, self.path_prefix)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    // ── Controls ───────────────────────────────────────────

    pub async fn apply(&self, control: MockControl) {
        info!(?control, "Mock CSMS control");
        match control {
            MockControl::Latency { min_ms, max_ms } => {
                self.set_latency(Some(Latency { min_ms, max_ms })).await
            }
            MockControl::Error(fault) => self.inject_fault(fault),
            MockControl::ConnectionState {
                station_id,
                profile,
            } => self.set_connection_profile(&station_id, profile),
        }
    }

    pub async fn set_boot_response(&self, status: &str, interval: u64) {
        let mut behavior = self.state.behavior.write().await;
        behavior.boot_status = status.to_string();
        behavior.heartbeat_interval = interval;
    }

    pub async fn set_latency(&self, latency: Option<Latency>) {
        self.state.behavior.write().await.latency = latency;
    }

    pub fn inject_fault(&self, fault: Fault) {
        if let Ok(mut faults) = self.state.faults.lock() {
            faults.push(fault);
        }
    }

    pub fn set_connection_profile(&self, station_id: &str, profile: ConnectionProfile) {
        self.state.profiles.insert(station_id.to_string(), profile);
    }

    /// Authorize / StartTransaction / TransactionEvent answer `Blocked` for
    /// this tag.
    pub fn block_id_tag(&self, id_tag: &str) {
        self.state.blocked_tags.insert(id_tag.to_string());
    }

    // ── Inspection ─────────────────────────────────────────

    pub fn received_calls(&self) -> Vec<ReceivedCall> {
        self.state
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn calls_for(&self, station_id: &str, action: &str) -> Vec<ReceivedCall> {
        self.received_calls()
            .into_iter()
            .filter(|c| c.station_id == station_id && c.action == action)
            .collect()
    }

    pub fn count_calls(&self, station_id: &str, action: &str) -> usize {
        self.calls_for(station_id, action).len()
    }

    pub fn is_connected(&self, station_id: &str) -> bool {
        self.state.peers.contains_key(station_id)
    }

    /// Number of completed handshakes for `station_id`.
    pub fn connection_count(&self, station_id: &str) -> u32 {
        self.state
            .handshakes
            .get(station_id)
            .map(|n| *n)
            .unwrap_or(0)
    }

    /// First recorded `action` CALL of `station_id`, waiting up to `timeout`.
    pub async fn wait_for_call(
        &self,
        station_id: &str,
        action: &str,
        timeout: Duration,
    ) -> Option<ReceivedCall> {
        self.wait_until(timeout, || {
            self.calls_for(station_id, action).into_iter().next()
        })
        .await
    }

    /// Wait until at least `count` `action` CALLs of `station_id` arrived.
    pub async fn wait_for_calls(
        &self,
        station_id: &str,
        action: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        self.wait_until(timeout, || {
            (self.count_calls(station_id, action) >= count).then_some(())
        })
        .await
        .is_some()
    }

    pub async fn wait_for_connection(&self, station_id: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, || self.is_connected(station_id).then_some(()))
            .await
            .is_some()
    }

    pub async fn wait_for_disconnection(&self, station_id: &str, timeout: Duration) -> bool {
        self.wait_until(timeout, || (!self.is_connected(station_id)).then_some(()))
            .await
            .is_some()
    }

    /// Wait for the `n`-th handshake of `station_id`.
    pub async fn wait_for_handshakes(&self, station_id: &str, n: u32, timeout: Duration) -> bool {
        self.wait_until(timeout, || {
            (self.connection_count(station_id) >= n).then_some(())
        })
        .await
        .is_some()
    }

    async fn wait_until<T>(&self, timeout: Duration, check: impl Fn() -> Option<T>) -> Option<T> {
        let mut changed = self.state.changed.subscribe();
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(found) = check() {
                    return Some(found);
                }
                if changed.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    // ── CSMS → station ─────────────────────────────────────

    /// Send a CALL to a connected station and wait for its answer.
    pub async fn send_call(
        &self,
        station_id: &str,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, OcppError> {
        let (outbound, pending) = {
            let peer = self
                .state
                .peers
                .get(station_id)
                .ok_or(OcppError::NotConnected)?;
            (peer.outbound.clone(), peer.pending.clone())
        };

        pending
            .call(action, payload, timeout, |text| {
                outbound
                    .send(Message::Text(text))
                    .map_err(|_| OcppError::NotConnected)
            })
            .await
    }

    /// Negotiated protocol of a connected station.
    pub fn protocol_of(&self, station_id: &str) -> Option<OcppVersion> {
        self.state.peers.get(station_id).map(|p| p.version)
    }

    /// Close the station's socket with a close frame.
    pub fn disconnect(&self, station_id: &str, code: u16, reason: &str) -> bool {
        match self.state.peers.get(station_id) {
            Some(peer) => peer
                .outbound
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.to_string().into(),
                })))
                .is_ok(),
            None => false,
        }
    }

    /// Drop the station's socket without a close frame.
    pub fn drop_connection(&self, station_id: &str) -> bool {
        match self.state.peers.get(station_id) {
            Some(peer) => {
                peer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting and drop every connection.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("🛑 Mock CSMS shutting down");
            self.shutdown.cancel();
        }
    }
}

impl Drop for MockCsms {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Connection handling ────────────────────────────────────────

async fn run_accept_loop(listener: TcpListener, state: Arc<MockState>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let state = state.clone();
                    let token = shutdown.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, state, token).await {
                            warn!("Mock CSMS connection from {} failed: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("Mock CSMS accept loop stopped");
}

/// `/ocpp/{id}` or `/{id}`.
fn extract_station_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_start_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<MockState>,
    token: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut station_id: Option<String> = None;
    let mut version: Option<OcppVersion> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let requested = req
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            match state.negotiator.negotiate(requested) {
                Some(v) => {
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(v.subprotocol()));
                    version = Some(v);
                }
                None => warn!(
                    requested,
                    supported = ?state.negotiator.supported_subprotocols(),
                    "No common OCPP subprotocol"
                ),
            }

            station_id = extract_station_id(req.uri().path());
            Ok(response)
        },
    )
    .await?;

    let station_id = station_id.unwrap_or_else(|| format!("CP_{}", addr.port()));
    let Some(version) = version else {
        // Handshake went through without a subprotocol; the station hangs up.
        return Ok(());
    };

    let connection_id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let pending = Arc::new(PendingCallRegistry::new(format!("csms:{station_id}")));

    if let Some(previous) = state.peers.insert(
        station_id.clone(),
        Peer {
            connection_id,
            version,
            outbound: tx.clone(),
            pending: pending.clone(),
            token: token.clone(),
        },
    ) {
        previous.token.cancel();
    }
    *state.handshakes.entry(station_id.clone()).or_insert(0) += 1;
    state.touch();
    info!(station_id = %station_id, %version, "[{}] Connected from {}", station_id, addr);

    let send_id = station_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                debug!("[{}] Send error: {}", send_id, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match handle_text(&state, &station_id, version, &pending, &text).await {
                        Some(Reply::Respond(frame)) => {
                            if tx.send(Message::Text(frame.serialize())).is_err() {
                                break;
                            }
                        }
                        Some(Reply::Drop) | None => {}
                        Some(Reply::Disconnect) => {
                            info!("[{}] Dropping connection (fault)", station_id);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("[{}] Close frame received: {:?}", station_id, frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("[{}] WebSocket error: {}", station_id, e);
                    break;
                }
                None => break,
            },
            _ = &mut send_task => break,
            _ = token.cancelled() => break,
        }
    }

    send_task.abort();
    pending.cancel_all("connection closed");
    state
        .peers
        .remove_if(&station_id, |_, peer| peer.connection_id == connection_id);
    state.touch();
    info!("[{}] Disconnected", station_id);
    Ok(())
}

async fn handle_text(
    state: &MockState,
    station_id: &str,
    version: OcppVersion,
    pending: &PendingCallRegistry,
    text: &str,
) -> Option<Reply> {
    let frame = match OcppFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("[{}] Malformed frame: {}", station_id, e);
            return None;
        }
    };

    match frame {
        OcppFrame::Call {
            message_id,
            action,
            payload,
        } => {
            debug!("[{}] <- {} {}", station_id, action, payload);
            state.record(ReceivedCall {
                station_id: station_id.to_string(),
                message_id: message_id.clone(),
                action: action.clone(),
                payload: payload.clone(),
                received_at: Utc::now(),
            });
            Some(answer_call(state, station_id, version, message_id, &action, &payload).await)
        }
        OcppFrame::CallResult {
            message_id,
            payload,
        } => {
            pending.resolve(&message_id, payload);
            None
        }
        OcppFrame::CallError {
            message_id,
            error_code,
            error_description,
            error_details,
        } => {
            pending.reject(&message_id, &error_code, &error_description, error_details);
            None
        }
    }
}

async fn answer_call(
    state: &MockState,
    station_id: &str,
    version: OcppVersion,
    message_id: String,
    action: &str,
    payload: &Value,
) -> Reply {
    let fault = state.take_fault(action);
    match &fault {
        Some(Fault::Disconnect) => return Reply::Disconnect,
        Some(Fault::CallError {
            code, description, ..
        }) => {
            return Reply::Respond(OcppFrame::error_response(
                message_id,
                code.as_str(),
                description.as_str(),
            ))
        }
        _ => {}
    }

    if let Some(ConnectionProfile::Intermittent {
        disconnect_probability,
        message_drop_probability,
    }) = state.profiles.get(station_id).map(|p| *p)
    {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(disconnect_probability.clamp(0.0, 1.0)) {
            return Reply::Disconnect;
        }
        if rng.gen_bool(message_drop_probability.clamp(0.0, 1.0)) {
            debug!("[{}] Dropping {} (intermittent)", station_id, action);
            return Reply::Drop;
        }
    }

    let behavior = state.behavior.read().await.clone();
    if let Some(latency) = behavior.latency {
        tokio::time::sleep(latency.draw()).await;
    }

    let boot_status = if fault == Some(Fault::RejectBoot) {
        "Rejected"
    } else {
        behavior.boot_status.as_str()
    };

    match default_response(state, version, action, payload, boot_status, behavior.heartbeat_interval) {
        Some(response) => Reply::Respond(OcppFrame::result(message_id, response)),
        None => Reply::Respond(OcppFrame::error_response(
            message_id,
            "NotImplemented",
            format!("{action} is not supported by the mock CSMS"),
        )),
    }
}

fn tag_status(state: &MockState, id_tag: Option<&str>) -> &'static str {
    match id_tag {
        Some(tag) if state.blocked_tags.contains(tag) => "Blocked",
        _ => "Accepted",
    }
}

fn default_response(
    state: &MockState,
    version: OcppVersion,
    action: &str,
    payload: &Value,
    boot_status: &str,
    heartbeat_interval: u64,
) -> Option<Value> {
    let now = Utc::now().to_rfc3339();
    let response = match (version, action) {
        (_, "BootNotification") => json!({
            "status": boot_status,
            "currentTime": now,
            "interval": heartbeat_interval,
        }),
        (_, "Heartbeat") => json!({ "currentTime": now }),
        (_, "StatusNotification") | (_, "MeterValues") => json!({}),
        (_, "DataTransfer") => json!({ "status": "Accepted" }),
        (OcppVersion::V16, "Authorize") => {
            let status = tag_status(state, payload.get("idTag").and_then(Value::as_str));
            json!({ "idTagInfo": { "status": status } })
        }
        (OcppVersion::V16, "StartTransaction") => {
            let status = tag_status(state, payload.get("idTag").and_then(Value::as_str));
            json!({
                "transactionId": state.next_transaction_id.fetch_add(1, Ordering::Relaxed),
                "idTagInfo": { "status": status },
            })
        }
        (OcppVersion::V16, "StopTransaction") => json!({ "idTagInfo": { "status": "Accepted" } }),
        (OcppVersion::V201, "Authorize") => {
            let status = tag_status(state, payload.pointer("/idToken/idToken").and_then(Value::as_str));
            json!({ "idTokenInfo": { "status": status } })
        }
        (OcppVersion::V201, "TransactionEvent") => {
            match payload.pointer("/idToken/idToken").and_then(Value::as_str) {
                Some(token) => json!({ "idTokenInfo": { "status": tag_status(state, Some(token)) } }),
                None => json!({}),
            }
        }
        _ => return None,
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn station_id_from_path() {
        assert_eq!(extract_station_id("/ocpp/CP001"), Some("CP001".to_string()));
        assert_eq!(extract_station_id("/CP002"), Some("CP002".to_string()));
        assert_eq!(extract_station_id("/"), None);
        assert_eq!(extract_station_id("/a/b/c"), None);
    }

    #[test]
    fn controls_from_json() {
        let latency: MockControl =
            serde_json::from_value(json!({"control": "latency", "minMs": 10, "maxMs": 50})).unwrap();
        assert_eq!(latency, MockControl::Latency { min_ms: 10, max_ms: 50 });

        let fault: MockControl =
            serde_json::from_value(json!({"control": "error", "type": "rejectBoot"})).unwrap();
        assert_eq!(fault, MockControl::Error(Fault::RejectBoot));

        let profile: MockControl = serde_json::from_value(json!({
            "control": "connectionState",
            "stationId": "CP001",
            "type": "intermittent",
            "disconnectProbability": 0.1,
            "messageDropProbability": 0.2
        }))
        .unwrap();
        assert_eq!(
            profile,
            MockControl::ConnectionState {
                station_id: "CP001".to_string(),
                profile: ConnectionProfile::Intermittent {
                    disconnect_probability: 0.1,
                    message_drop_probability: 0.2,
                },
            }
        );
    }

    #[test]
    fn faults_match_actions() {
        assert!(Fault::RejectBoot.matches("BootNotification"));
        assert!(!Fault::RejectBoot.matches("Heartbeat"));
        let any = Fault::CallError {
            action: None,
            code: "InternalError".into(),
            description: String::new(),
        };
        assert!(any.matches("Heartbeat"));
    }

    #[test]
    fn latency_draw_is_in_range() {
        let latency = Latency { min_ms: 50, max_ms: 10 };
        for _ in 0..20 {
            let d = latency.draw();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn records_nothing_before_connections() {
        let csms = MockCsms::start().await.unwrap();
        assert!(csms.url().starts_with("ws://127.0.0.1:"));
        assert!(csms.received_calls().is_empty());
        assert!(!csms.is_connected("CP001"));
        assert!(!csms.wait_for_connection("CP001", Duration::from_millis(20)).await);
        assert!(matches!(
            csms.send_call("CP001", "Reset", json!({}), Duration::from_secs(1)).await,
            Err(OcppError::NotConnected)
        ));
        csms.shutdown();
    }
}
