use serde::{Deserialize, Serialize};
use serde_json::Value;

use renfield_core::types::{DeviceCapabilities, DeviceKind};

/// Device → Gateway frame (§6 inbound table). Tagged on `type` so a
/// malformed or unknown frame fails to deserialize rather than silently
/// matching the wrong variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceFrame {
    Register {
        device_id: String,
        kind: DeviceKind,
        capabilities: DeviceCapabilities,
        #[serde(default)]
        room_id: Option<String>,
    },
    Text {
        session_id: Option<String>,
        text: String,
    },
    VoiceStart {
        session_id: Option<String>,
        #[serde(default)]
        sample_rate_hz: Option<u32>,
    },
    VoiceChunk {
        session_id: String,
        /// Base64-encoded PCM chunk — the codec itself is out of scope.
        audio: String,
        sequence: u64,
    },
    VoiceEnd {
        session_id: String,
    },
    WakewordDetected {
        #[serde(default)]
        confidence: Option<f32>,
    },
    Heartbeat,
    NotificationAck {
        notification_id: String,
    },
    Cancel {
        session_id: String,
    },
}

/// Gateway → Device frame (§6 outbound table).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    RegisterAck {
        success: bool,
        device_id: String,
        room_id: String,
        capabilities: DeviceCapabilities,
        protocol: u32,
    },
    State {
        session_id: String,
        state: TurnState,
    },
    Transcription {
        session_id: String,
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    RagContext {
        session_id: String,
        has_context: bool,
        #[serde(default)]
        sources: Option<Vec<Value>>,
    },
    Action {
        session_id: String,
        intent: String,
        result: Value,
    },
    Stream {
        session_id: String,
        delta: String,
    },
    AgentThinking {
        session_id: String,
        content: String,
    },
    AgentToolCall {
        session_id: String,
        tool: String,
        arguments: Value,
    },
    AgentToolResult {
        session_id: String,
        tool: String,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
    },
    ResponseText {
        session_id: String,
        text: String,
    },
    TtsAudio {
        session_id: String,
        /// Base64-encoded audio chunk, routed per §4.6's 4-tier policy.
        audio: String,
        is_final: bool,
    },
    /// Terminates a turn. Per §7, exactly one of `Done` or `Error` is sent
    /// per turn — never both.
    Done {
        session_id: String,
        /// True when TTS was handled server-side for a voice-origin turn
        /// with a designated audio-output device (§4.5 step 7, §4.6).
        tts_handled: bool,
        #[serde(default)]
        intent: Option<String>,
    },
    SessionEnd {
        session_id: String,
        reason: String,
    },
    Error {
        session_id: Option<String>,
        kind: String,
        message: String,
    },
    HeartbeatAck,
    ConfigUpdate {
        config: Value,
    },
    /// Fan-out of a proactive notification (§4.6 "fans out the `notification`
    /// event"); not one of a turn's events, so it carries no `session_id`.
    Notification {
        notification_id: String,
        title: String,
        #[serde(default)]
        body: Option<String>,
    },
}

/// Device-visible turn state (§6 `state` out-frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl ServerFrame {
    pub fn error(session_id: Option<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            session_id,
            kind: kind.into(),
            message: message.into(),
        }
    }
}
