use serde::{Deserialize, Serialize};

use renfield_core::types::{Message, ProviderState, Session};

/// `POST /webhooks/{source}` body — opaque to the Gateway beyond routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookNotification {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub target_room_id: Option<String>,
    #[serde(default)]
    pub target_device_id: Option<String>,
    #[serde(default)]
    pub priority: NotificationPriority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    #[default]
    Normal,
    Urgent,
}

/// `GET /health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub protocol: u32,
    pub connected_devices: usize,
}

// ---------------------------------------------------------------------------
// §6 `/api/chat/*` REST surface
// ---------------------------------------------------------------------------

/// `GET /api/chat/conversations?limit&offset` query params.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// `GET /api/chat/conversations` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Session>,
    pub total: usize,
}

/// `GET /api/chat/history/{session_id}?limit` query params.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatHistoryQuery {
    pub limit: Option<usize>,
}

/// `GET /api/chat/history/{session_id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    pub messages: Vec<Message>,
}

/// `GET /api/chat/search?q&limit` query params.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

/// `GET /api/chat/search` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSearchResponse {
    pub query: String,
    pub results: Vec<renfield_core::types::SearchHit>,
    pub count: usize,
}

/// `GET /api/chat/stats` response — aggregate counts across the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStatsResponse {
    pub session_count: usize,
    pub message_count: usize,
}

/// `POST /api/chat/send` request body — the synchronous single-turn variant
/// (§6: "context window = 20; no streaming").
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub session_id: String,
}

/// `POST /api/chat/send` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: Message,
}

/// `DELETE /api/chat/session/{session_id}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    pub success: bool,
}

/// `DELETE /api/chat/conversations/cleanup?days=N` query params.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

/// `DELETE /api/chat/conversations/cleanup` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub cutoff_days: i64,
}

// ---------------------------------------------------------------------------
// §6 `/api/tools*` REST surface
// ---------------------------------------------------------------------------

/// `GET /api/tools` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsResponse {
    pub tools: Vec<renfield_core::types::ToolDescriptor>,
    pub total: usize,
}

/// `GET /api/tools/status` response entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStatusEntry {
    pub provider_name: String,
    pub state: ProviderState,
    pub transport: &'static str,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

/// `POST /api/tools/refresh` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub servers_reconnected: usize,
}
