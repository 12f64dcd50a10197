//! Per-frame dispatch for the Device Gateway protocol (§6 inbound table).
//!
//! Each arm either replies directly over the connection's own outbound
//! channel or builds a [`TurnRequest`] and hands it to `SessionWorkers`,
//! which is what actually drives the Turn Engine — this module never calls
//! `TurnEngine::run_turn` itself.

use base64::Engine as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use renfield_core::config::PROTOCOL_VERSION;
use renfield_core::types::{InputChannel, PermissionSet, SessionOrigin, SubjectIdentity, TurnContext};
use renfield_protocol::frames::{DeviceFrame, ServerFrame, TurnState};
use renfield_turn::{NotificationLedger, TurnRequest};

use crate::app::AppState;
use crate::ws::connection::ConnectionState;

pub async fn handle(
    state: &AppState,
    conn: &mut ConnectionState,
    outbound: &mpsc::Sender<ServerFrame>,
    frame: DeviceFrame,
) {
    match frame {
        DeviceFrame::Register { device_id, kind, capabilities, room_id } => {
            let narrowed = renfield_core::routing::narrow_capabilities(kind, capabilities);
            let device = state.devices.register(&device_id, kind, narrowed, room_id, None);
            conn.device_id = Some(device_id.clone());
            state.ws_clients.insert(device_id.clone(), outbound.clone());
            state.device_subjects.insert(device_id.clone(), device_id.clone());
            let _ = outbound
                .send(ServerFrame::RegisterAck {
                    success: true,
                    device_id,
                    room_id: device.room_id,
                    capabilities: device.capabilities,
                    protocol: PROTOCOL_VERSION,
                })
                .await;
        }

        DeviceFrame::Heartbeat => {
            if let Some(device_id) = &conn.device_id {
                state.devices.touch_heartbeat(device_id);
            }
            let _ = outbound.send(ServerFrame::HeartbeatAck).await;
        }

        DeviceFrame::Text { session_id, text } => {
            let Some(device_id) = conn.device_id.clone() else {
                let _ = outbound.send(ServerFrame::error(None, "NotRegistered", "send register before text")).await;
                return;
            };
            let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            start_turn(state, conn, outbound, &device_id, &session_id, InputChannel::Text, text).await;
        }

        DeviceFrame::VoiceStart { session_id, sample_rate_hz } => {
            let _ = sample_rate_hz;
            let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
            conn.voice_buffers.insert(session_id.clone(), Vec::new());
            let _ = outbound.send(ServerFrame::State { session_id, state: TurnState::Listening }).await;
        }

        DeviceFrame::VoiceChunk { session_id, audio, sequence } => {
            let _ = sequence;
            let Some(buffer) = conn.voice_buffers.get_mut(&session_id) else {
                warn!(session_id, "voice_chunk for a session with no voice_start, dropping");
                return;
            };
            match base64::engine::general_purpose::STANDARD.decode(audio.as_bytes()) {
                Ok(mut bytes) => buffer.append(&mut bytes),
                Err(e) => warn!(session_id, error = %e, "voice_chunk audio is not valid base64"),
            }
        }

        DeviceFrame::VoiceEnd { session_id } => {
            let Some(device_id) = conn.device_id.clone() else {
                let _ = outbound
                    .send(ServerFrame::error(Some(session_id), "NotRegistered", "send register before voice"))
                    .await;
                return;
            };
            let pcm = conn.voice_buffers.remove(&session_id).unwrap_or_default();
            match state.stt.transcribe(vec![pcm]).await {
                Ok(text) => {
                    let _ = outbound
                        .send(ServerFrame::Transcription { session_id: session_id.clone(), text: text.clone(), is_final: true })
                        .await;
                    start_turn(state, conn, outbound, &device_id, &session_id, InputChannel::Voice, text).await;
                }
                Err(e) => {
                    let _ = outbound.send(ServerFrame::error(Some(session_id), "SttUnavailable", e.to_string())).await;
                }
            }
        }

        DeviceFrame::WakewordDetected { confidence } => {
            if let Some(device_id) = &conn.device_id {
                tracing::debug!(device_id, confidence, "wakeword detected");
            }
        }

        DeviceFrame::NotificationAck { notification_id } => {
            state.notifications.ack(&notification_id, false).await;
        }

        DeviceFrame::Cancel { session_id } => {
            if let Some(cancel) = conn.cancels.remove(&session_id) {
                cancel.cancel();
            } else {
                warn!(session_id, "cancel for a session with no in-flight turn on this connection");
            }
            let _ = outbound.send(ServerFrame::SessionEnd { session_id, reason: "cancelled".to_string() }).await;
        }
    }
}

/// Build the `TurnContext` for `device_id`'s session and enqueue it on the
/// session's FIFO queue (§4.6). Resolves an audio-output device for a
/// voice-channel turn per the §4.6 routing policy before handing off, so the
/// Turn Engine can decide whether to speak its reply (§4.5 step 8).
async fn start_turn(
    state: &AppState,
    conn: &mut ConnectionState,
    outbound: &mpsc::Sender<ServerFrame>,
    device_id: &str,
    session_id: &str,
    channel: InputChannel,
    utterance: String,
) {
    let Some(device) = state.devices.get(device_id) else {
        let _ = outbound
            .send(ServerFrame::error(Some(session_id.to_string()), "NotRegistered", "unknown device"))
            .await;
        return;
    };

    let origin = match device.kind {
        renfield_core::types::DeviceKind::Browser => SessionOrigin::BrowserWs,
        _ => SessionOrigin::Satellite,
    };

    let audio_tx = if matches!(channel, InputChannel::Voice) { resolve_audio_tx(state, &device) } else { None };

    let ctx = TurnContext {
        session_id: session_id.to_string(),
        device_id: Some(device_id.to_string()),
        room_id: Some(device.room_id.clone()),
        subject: SubjectIdentity {
            subject_id: state
                .device_subjects
                .get(device_id)
                .map(|s| s.value().clone())
                .unwrap_or_else(|| device_id.to_string()),
            display_name: None,
            permissions: PermissionSet(vec![]),
        },
        channel,
        origin,
        use_rag: false,
        knowledge_base_id: None,
        attachment_ids: vec![],
    };

    let cancel = CancellationToken::new();
    conn.cancels.insert(session_id.to_string(), cancel.clone());

    let request = TurnRequest { ctx, utterance, events_tx: outbound.clone(), audio_tx, cancel };

    state.workers.enqueue(std::sync::Arc::clone(&state.turn_engine), session_id, request).await;
}

/// §4.6 audio-output routing: the originating device if it's a stationary
/// speaker, else the best room sibling, else nobody (TTS is skipped).
fn resolve_audio_tx(state: &AppState, origin: &renfield_core::types::Device) -> Option<mpsc::Sender<ServerFrame>> {
    let siblings = state.devices.room_siblings(&origin.room_id, &origin.device_id);
    let chosen = renfield_core::routing::select_audio_output_device(origin, &siblings)?;
    state.ws_clients.get(&chosen.device_id).map(|s| s.clone())
}
