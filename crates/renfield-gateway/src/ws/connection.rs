//! Device Gateway WebSocket entrypoint — `GET /ws` (§5, §6).
//!
//! One task per connection: a single inbound loop parses `DeviceFrame`s and
//! hands them to [`crate::ws::message::handle`]; a single bounded outbound
//! channel (§5 back-pressure) carries every `ServerFrame` this connection
//! emits, whether a direct reply (`register_ack`, `heartbeat_ack`) or an
//! event streamed out of a Turn Engine run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use renfield_core::config::{HANDSHAKE_TIMEOUT_MS, MAX_PAYLOAD_BYTES};
use renfield_protocol::frames::{DeviceFrame, ServerFrame};

use crate::app::AppState;
use crate::ws::{message, send};

const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Per-socket bookkeeping that has no place on the shared `AppState` — one
/// `ConnectionState` per live connection, dropped along with the task when
/// the socket closes.
#[derive(Default)]
pub struct ConnectionState {
    pub device_id: Option<String>,
    /// Accumulated PCM bytes per in-flight voice session, from `voice_start`
    /// through `voice_end` (§6 inbound `voice_chunk`).
    pub voice_buffers: HashMap<String, Vec<u8>>,
    /// Cancellation handle per in-flight turn this connection started, so a
    /// `cancel` frame can stop the right one (§6 inbound `cancel`).
    pub cancels: HashMap<String, CancellationToken>,
}

/// `GET /ws` — authenticates the same way the REST surface does (bearer
/// token, via header or `?token=`) before upgrading, since the Device
/// Gateway protocol itself carries no credential in its `register` frame.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| params.get("token").map(String::as_str));

    if !state.check_bearer(token) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, state)).into_response()
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new device connection");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE_DEPTH);

    let mut conn = ConnectionState::default();

    // §6: an unregistered connection is dropped if `register` doesn't arrive
    // within HANDSHAKE_TIMEOUT_MS.
    let handshake_deadline = tokio::time::Instant::now() + Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(handshake_deadline));

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large, closing connection");
                            break;
                        }
                        match serde_json::from_str::<DeviceFrame>(&text) {
                            Ok(frame) => message::handle(&state, &mut conn, &outbound_tx, frame).await,
                            Err(e) => {
                                warn!(conn_id, error = %e, "malformed device frame");
                                let _ = outbound_tx
                                    .send(ServerFrame::error(None, "TransportError", format!("malformed frame: {e}")))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "websocket transport error");
                        break;
                    }
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if send::frame(&mut sink, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = &mut handshake_timer => {
                if conn.device_id.is_none() {
                    warn!(conn_id, "no register frame within the handshake window, closing");
                    break;
                }
            }
        }
    }

    for cancel in conn.cancels.values() {
        cancel.cancel();
    }
    if let Some(device_id) = conn.device_id.take() {
        state.devices.mark_offline(&device_id);
        state.ws_clients.remove(&device_id);
        state.device_subjects.remove(&device_id);
    }
    info!(conn_id = %conn_id, "device connection closed");
}
