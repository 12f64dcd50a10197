//! `/api/chat/*` REST surface (§6) — the synchronous, non-streaming window
//! onto the Conversation Store and the Turn Engine, for callers that don't
//! hold a Device Gateway WebSocket.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use renfield_core::types::{InputChannel, PermissionSet, SessionOrigin, SubjectIdentity, TurnContext};
use renfield_protocol::rest::{
    ChatHistoryQuery, ChatHistoryResponse, ChatSearchQuery, ChatSearchResponse, ChatStatsResponse, CleanupQuery,
    CleanupResponse, ConversationsQuery, ConversationsResponse, DeleteSessionResponse, SendMessageRequest,
    SendMessageResponse,
};
use renfield_turn::TurnRequest;

use crate::app::AppState;
use crate::error::GatewayError;

const DEFAULT_CONVERSATIONS_PAGE: usize = 50;
const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_CLEANUP_DAYS: i64 = 30;

fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if state.check_bearer(token) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// `GET /api/chat/conversations?limit&offset`
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ConversationsQuery>,
) -> Result<Json<ConversationsResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_CONVERSATIONS_PAGE);
    let offset = query.offset.unwrap_or(0);
    let (conversations, total) = state.store.list(limit, offset).map_err(GatewayError::from)?;
    Ok(Json(ConversationsResponse { conversations, total }))
}

/// `GET /api/chat/conversation/{session_id}/summary`
pub async fn conversation_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<renfield_core::types::ConversationSummary>, GatewayError> {
    require_auth(&state, &headers)?;
    let summary = state.store.summarize(&session_id).map_err(GatewayError::from)?;
    summary.map(Json).ok_or(GatewayError::SessionNotFound(session_id))
}

/// `GET /api/chat/history/{session_id}?limit`
pub async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<ChatHistoryResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let messages = state.store.window(&session_id, limit).map_err(GatewayError::from)?;
    Ok(Json(ChatHistoryResponse { messages }))
}

/// `GET /api/chat/search?q&limit`
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ChatSearchQuery>,
) -> Result<Json<ChatSearchResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    if query.q.chars().count() < 2 {
        return Err(GatewayError::BadRequest("q must be at least 2 characters".to_string()));
    }
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = state.store.search(&query.q, limit).map_err(GatewayError::from)?;
    Ok(Json(ChatSearchResponse { query: query.q, count: results.len(), results }))
}

/// `GET /api/chat/stats`
pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChatStatsResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    let (session_count, message_count) = state.store.stats().map_err(GatewayError::from)?;
    Ok(Json(ChatStatsResponse { session_count, message_count }))
}

/// `POST /api/chat/send` — the synchronous single-turn variant (§6: context
/// window 20, no streaming). Runs the turn to completion inline rather than
/// via `SessionWorkers`, since the caller is already blocked on the HTTP
/// response; `TurnEngine`'s own per-session mutex (I1) still serializes
/// against any concurrent WS-origin turn for the same session.
pub async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, GatewayError> {
    require_auth(&state, &headers)?;

    let ctx = TurnContext {
        session_id: req.session_id.clone(),
        device_id: None,
        room_id: None,
        subject: SubjectIdentity {
            subject_id: "anonymous".to_string(),
            display_name: None,
            permissions: PermissionSet(vec![]),
        },
        channel: InputChannel::Text,
        origin: SessionOrigin::Rest,
        use_rag: false,
        knowledge_base_id: None,
        attachment_ids: vec![],
    };

    let (events_tx, mut events_rx) = mpsc::channel(32);
    let drain = tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

    let turn_request = TurnRequest {
        ctx,
        utterance: req.message,
        events_tx,
        audio_tx: None,
        cancel: CancellationToken::new(),
    };

    state.turn_engine.run_turn(turn_request).await?;
    let _ = drain.await;

    let tail = state.store.window(&req.session_id, 1).map_err(GatewayError::from)?;
    let message = tail
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::SessionNotFound(req.session_id.clone()))?;
    Ok(Json(SendMessageResponse { message }))
}

/// `DELETE /api/chat/session/{session_id}`
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    state.store.delete(&session_id).map_err(GatewayError::from)?;
    Ok(Json(DeleteSessionResponse { success: true }))
}

/// `DELETE /api/chat/conversations/cleanup?days=N`
pub async fn cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, GatewayError> {
    require_auth(&state, &headers)?;
    let cutoff_days = query.days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    let deleted_count = state
        .store
        .cleanup(chrono::Duration::days(cutoff_days))
        .map_err(GatewayError::from)?;
    Ok(Json(CleanupResponse { success: true, deleted_count, cutoff_days }))
}
