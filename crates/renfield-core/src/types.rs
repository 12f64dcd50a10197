use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of client that can hold a Device Gateway WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    StationaryPanel,
    MobileTablet,
    Browser,
    Kiosk,
    Satellite,
}

/// Capabilities a device declares at registration time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub has_microphone: bool,
    pub has_speaker: bool,
    pub has_wakeword: bool,
    pub has_display: bool,
}

/// A connected client: voice satellite, browser panel, tablet, or kiosk.
///
/// Created on first `register`, updated on every subsequent `register`.
/// The core never deletes a Device record — only an admin collaborator does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub kind: DeviceKind,
    pub capabilities: DeviceCapabilities,
    pub room_id: String,
    /// True when `room_id` came from an admin assignment rather than the
    /// device's own `register` frame (invariant I4 — admin wins ties).
    pub room_admin_assigned: bool,
    pub is_stationary: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub online: bool,
}

impl Device {
    /// Apply invariant I4: a client-declared room never overwrites an
    /// admin-assigned one; an admin assignment always overwrites either.
    pub fn assign_room(&mut self, room_id: String, admin_assigned: bool) {
        if admin_assigned || !self.room_admin_assigned {
            self.room_id = room_id;
            self.room_admin_assigned = admin_assigned;
        }
    }
}

/// A grouping of devices used to pick an audio-output device (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub external_area_id: Option<String>,
}

/// Which transport carried the utterance into the Turn Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputChannel {
    Text,
    Voice,
}

/// Logical origin channel for a session, used only to size the context
/// window (§4.5) — distinct from `InputChannel`, which is per-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOrigin {
    Rest,
    BrowserWs,
    Satellite,
}

impl SessionOrigin {
    /// Context window size per §4.5: 20 for REST, 10 for browser WS, 5 for satellite.
    pub fn context_window_size(self) -> usize {
        match self {
            SessionOrigin::Rest => 20,
            SessionOrigin::BrowserWs => 10,
            SessionOrigin::Satellite => 5,
        }
    }
}

/// A named ordered transcript. Session identity is `session_id`; semantics of
/// how that id is produced differ by origin (§3) but are opaque to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `summarize(session_id)` result (§4.1) — cheap metadata about a session's
/// transcript, distinct from the LLM-authored compaction summary the store
/// also supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub message_count: usize,
    pub first_message: Option<Message>,
    pub last_message: Option<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A `search(query)` hit (§4.1, §6 `GET /api/chat/search`): one matching
/// session plus the snippet that matched, ranked by recency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub session_id: String,
    pub snippet: String,
    pub matched_at: DateTime<Utc>,
}

/// Role of a persisted conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// An immutable, append-only conversation record (invariant I2: sequence is
/// gap-free and strictly increasing per session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub sequence: i64,
    pub role: MessageRole,
    pub content: String,
    /// Opaque structured blob: intent info, tool calls, attachments, device
    /// and room identifiers for voice turns. Consumers are external, so the
    /// core never interprets its shape beyond passing it through.
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Set when this assistant message was finalized after a cancellation
    /// mid-stream (§4.5 cancellation handling).
    #[serde(default)]
    pub partial: bool,
}

/// Server-prefixed, uniformly described tool exposed by a ready or degraded
/// provider. Name is always `{provider}__{original}` (§3, §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub provider_name: String,
    pub original_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_shape_hint: Option<serde_json::Value>,
    /// Per-call timeout override (default 10s, §4.3 step 5). `None` means
    /// the Dispatcher's own default applies.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Two-underscore namespace separator between provider and tool name (§4.2).
pub const TOOL_NAMESPACE_SEPARATOR: &str = "__";

impl ToolDescriptor {
    pub fn namespaced_name(provider_name: &str, original_name: &str) -> String {
        format!("{provider_name}{TOOL_NAMESPACE_SEPARATOR}{original_name}")
    }
}

/// Transport kind a tool provider process/endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderTransport {
    ChildProcessStdio,
    LongPollHttp,
    StreamingHttp,
}

/// Connection lifecycle state of a tool provider (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Disconnected,
    Connecting,
    Ready,
    Degraded,
    Failed,
}

impl ProviderState {
    /// Invariant I3: a provider's tools are visible to the Resolver iff
    /// the provider is `ready` or `degraded` (§4.2 `tools()`, §8).
    pub fn exposes_tools(self) -> bool {
        matches!(self, ProviderState::Ready | ProviderState::Degraded)
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderState::Disconnected => "disconnected",
            ProviderState::Connecting => "connecting",
            ProviderState::Ready => "ready",
            ProviderState::Degraded => "degraded",
            ProviderState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A permission grant consumed from the external auth collaborator. The core
/// never authors these — it only checks membership (§1 Non-goals).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(pub Vec<String>);

impl PermissionSet {
    pub fn allows(&self, permission: &str) -> bool {
        self.0.iter().any(|p| p == permission)
    }
}

/// Resolved caller identity, handed to the Turn Engine by the Gateway after
/// the external auth collaborator has authenticated the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectIdentity {
    pub subject_id: String,
    pub display_name: Option<String>,
    pub permissions: PermissionSet,
}

/// A single tool invocation within an AgentPlan or DirectActionPlan, and its
/// result once the Dispatcher has run it (§9 design note: tagged record
/// instead of the source's dict-shaped tool-call records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: Option<ToolOutcome>,
}

/// Uniform result envelope for a single tool invocation (§4.3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub value: Option<serde_json::Value>,
    pub error: Option<ToolError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
    pub retriable: bool,
}

/// The Intent Resolver's decision for a turn (§4.4, §9: tagged variant
/// instead of the source's dict-shaped intents/actions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum Plan {
    Conversation {
        hint: Option<String>,
    },
    DirectAction {
        call: ToolCall,
        needs_clarification: bool,
    },
    Agent {
        step_cap: u32,
        wall_clock_cap_secs: u64,
    },
}

/// Ephemeral per-turn record threading origin, identity, and context through
/// the Turn Engine (§3). Cancellation is a `tokio_util::sync::CancellationToken`
/// held alongside this in the Turn Engine, not serialized here.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub device_id: Option<String>,
    pub room_id: Option<String>,
    pub subject: SubjectIdentity,
    pub channel: InputChannel,
    pub origin: SessionOrigin,
    pub use_rag: bool,
    pub knowledge_base_id: Option<String>,
    pub attachment_ids: Vec<String>,
}
