//! Station side of the OCPP-J WebSocket
//!
//! [`open`] performs the handshake with the version subprotocol.
//! [`spawn_io`] splits the socket into a writer task, fed by the session's
//! outbound queue, and a reader task that dispatches frames in arrival
//! order: responses go to the pending-call registry, CSMS calls go to the
//! protocol handler.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::handlers::{ProtocolHandler, SharedProtocolHandler};
use crate::application::session::OutboundMessage;
use crate::domain::OcppVersion;
use crate::shared::{OcppError, OcppFrame};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How a socket ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
        }
    }
}

/// `<csms_url>/<station_id>`
pub fn build_station_url(csms_url: &str, station_id: &str) -> String {
    format!("{}/{}", csms_url.trim_end_matches('/'), station_id)
}

/// Open a WebSocket to `url`, offering only the subprotocol of `version`.
pub async fn open(url: &str, version: OcppVersion) -> Result<WsStream, OcppError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| OcppError::Connection(format!("invalid CSMS URL {url}: {e}")))?;
    request.headers_mut().insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(version.subprotocol()),
    );

    let (ws, response) = connect_async(request)
        .await
        .map_err(|e| OcppError::Connection(format!("{url}: {e}")))?;

    let accepted = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .and_then(OcppVersion::from_subprotocol);
    if accepted != Some(version) {
        return Err(OcppError::Connection(format!(
            "CSMS did not accept subprotocol {}",
            version.subprotocol()
        )));
    }

    info!(url, subprotocol = version.subprotocol(), "WebSocket handshake complete");
    Ok(ws)
}

/// Start the reader and writer tasks of one socket.
///
/// Returns the writer queue to attach to the session and a receiver that
/// fires once when the socket is gone. Cancelling `connection` stops the
/// reader; the writer stops after a close frame or once every sender of
/// its queue is dropped.
pub fn spawn_io(
    ws: WsStream,
    handler: SharedProtocolHandler,
    connection: CancellationToken,
) -> (mpsc::UnboundedSender<OutboundMessage>, oneshot::Receiver<CloseInfo>) {
    let (sink, stream) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = oneshot::channel();
    let station_id = handler.station_id().to_string();

    tokio::spawn(run_writer(sink, rx, station_id.clone()));
    tokio::spawn(async move {
        let info = run_reader(stream, &handler, &connection).await;
        debug!(station_id = %station_id, code = info.code, reason = %info.reason, "Socket reader stopped");
        let _ = closed_tx.send(info);
    });

    (tx, closed_rx)
}

async fn run_writer(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    station_id: String,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMessage::Text(text) => {
                debug!(station_id = %station_id, "-> {}", text);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(station_id = %station_id, error = %e, "Send error");
                    break;
                }
            }
            OutboundMessage::Close { code, reason } => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(station_id = %station_id, error = %e, "Close frame not sent");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn run_reader(
    mut stream: futures_util::stream::SplitStream<WsStream>,
    handler: &SharedProtocolHandler,
    connection: &CancellationToken,
) -> CloseInfo {
    let station_id = handler.station_id().to_string();
    loop {
        let msg = tokio::select! {
            _ = connection.cancelled() => return CloseInfo::abnormal("connection cancelled"),
            msg = stream.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => {
                debug!(station_id = %station_id, "<- {}", text);
                dispatch_text(handler, &text).await;
            }
            Some(Ok(Message::Close(frame))) => {
                info!(station_id = %station_id, ?frame, "Close frame received");
                return frame
                    .map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.into_owned(),
                    })
                    .unwrap_or_else(|| CloseInfo {
                        code: 1005,
                        reason: String::new(),
                    });
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(station_id = %station_id, bytes = data.len(), "Binary message ignored");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(station_id = %station_id, error = %e, "WebSocket error");
                return CloseInfo::abnormal(e.to_string());
            }
            None => return CloseInfo::abnormal("socket closed"),
        }
    }
}

/// Handle one text frame. Malformed frames are dropped; the socket stays up.
pub(crate) async fn dispatch_text(handler: &SharedProtocolHandler, text: &str) {
    let session = &handler.core().ctx.session;
    let frame = match OcppFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(station_id = %handler.station_id(), error = %e, "Dropping malformed frame");
            return;
        }
    };

    match frame {
        OcppFrame::Call {
            message_id,
            action,
            payload,
        } => {
            let (response, follow_up) = match handler.handle_inbound_call(&action, payload).await {
                Ok(reply) => (OcppFrame::result(&message_id, reply.payload), reply.follow_up),
                Err(e) => {
                    warn!(
                        station_id = %handler.station_id(),
                        action = %action,
                        code = %e.code,
                        "Answering with CallError"
                    );
                    (e.into_frame(&message_id), Vec::new())
                }
            };

            if let Err(e) = session.send_frame(&response).await {
                warn!(station_id = %handler.station_id(), message_id = %message_id, error = %e, "Response not sent");
                return;
            }
            for command in follow_up {
                handler.core().ctx.enqueue(command);
            }
        }
        response => {
            let message_id = response.message_id().to_string();
            if !session.route_response(response) {
                debug!(station_id = %handler.station_id(), message_id = %message_id, "Unmatched response dropped");
            }
        }
    }
}
