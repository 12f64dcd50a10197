use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use dashmap::DashMap;
use tokio::sync::mpsc;

use renfield_core::config::RenfieldConfig;
use renfield_protocol::frames::ServerFrame;
use renfield_store::ConversationStore;
use renfield_tools::{ToolDispatcher, ToolRegistry};
use renfield_turn::{IntentResolver, SessionRegistry, SttCollaborator, TurnEngine};

use crate::collaborators_stub::{AnonymousAuth, UnavailableLlm, UnavailableStt};
use crate::devices::DeviceRegistry;
use crate::notifications::NotificationCenter;
use crate::turn_queue::SessionWorkers;

/// Central shared state, passed as `Arc<AppState>` to every Axum handler and
/// the WS connection task.
pub struct AppState {
    pub config: RenfieldConfig,
    pub store: Arc<ConversationStore>,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_dispatcher: Arc<ToolDispatcher>,
    pub session_registry: Arc<SessionRegistry>,
    pub turn_engine: Arc<TurnEngine>,
    /// Speech-to-text collaborator (§1 Non-goals: external). Consulted only
    /// by the Device Gateway's `voice_end` handling, outside the Turn
    /// Engine's own pipeline — transcription happens before a turn exists.
    pub stt: Arc<dyn SttCollaborator>,
    pub devices: DeviceRegistry,
    pub workers: SessionWorkers,
    pub notifications: NotificationCenter,
    /// Live Device Gateway connections: `device_id -> outbound frame sender`
    /// (§4.6 "fans out the `notification` event", §5 "bounded" send
    /// channel backing every connection).
    pub ws_clients: DashMap<String, mpsc::Sender<ServerFrame>>,
    /// `device_id -> subject_id`, populated on `register`, consulted by the
    /// webhook fan-out to pick target devices by subject (§4.6).
    pub device_subjects: DashMap<String, String>,
}

impl AppState {
    /// Wires every component with the collaborator seams the spec leaves
    /// external (§1 Non-goals). Real deployments construct `AppState`
    /// themselves with concrete collaborators; this constructor is the
    /// runnable default the binary ships with.
    pub fn new(config: RenfieldConfig) -> Arc<Self> {
        let conn = rusqlite::Connection::open(&config.database.path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to open configured database, using in-memory store");
            rusqlite::Connection::open_in_memory().expect("in-memory sqlite connection")
        });
        let store = Arc::new(ConversationStore::new(conn).expect("conversation store schema init"));

        let tool_registry = Arc::new(ToolRegistry::new());
        for entry in &config.providers.entries {
            if entry.enabled {
                let registry = Arc::clone(&tool_registry);
                let provider_name = entry.name.clone();
                let transport = entry.transport.clone();
                let timeout_secs = entry.timeout_secs;
                tokio::spawn(async move {
                    registry.register_provider_with_transport(&provider_name, transport, timeout_secs).await;
                    if let Err(e) = registry.refresh(&provider_name).await {
                        tracing::warn!(provider = %provider_name, error = %e, "initial provider connect failed");
                    }
                });
            }
        }
        let tool_dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&tool_registry)));
        for entry in &config.providers.entries {
            tool_dispatcher.set_rate_limit(&entry.name, entry.rate_limit);
        }

        let session_registry = Arc::new(SessionRegistry::new());
        let llm = Arc::new(UnavailableLlm);
        let resolver = Arc::new(IntentResolver::new(
            Arc::clone(&tool_registry),
            Arc::clone(&tool_dispatcher),
            llm.clone(),
            config.features.agent_enabled,
        ));

        let turn_engine = Arc::new(TurnEngine::new(
            Arc::clone(&store),
            Arc::clone(&tool_registry),
            Arc::clone(&tool_dispatcher),
            resolver,
            Arc::clone(&session_registry),
            llm,
            config.llm.chat_model.clone(),
            "You are Renfield, a self-hosted voice and chat assistant.",
        ));

        Arc::new(Self {
            config,
            store,
            tool_registry,
            tool_dispatcher,
            session_registry,
            turn_engine,
            stt: Arc::new(UnavailableStt),
            devices: DeviceRegistry::new(),
            workers: SessionWorkers::new(),
            notifications: NotificationCenter::new(),
            ws_clients: DashMap::new(),
            device_subjects: DashMap::new(),
        })
    }

    /// Resolve a bearer token the way the Device Gateway and REST surface
    /// both need it — a fixed shared secret per `AuthConfig` (§10.3), not
    /// the per-subject `AuthCollaborator` contract, which callers reach for
    /// once they attach a real identity provider.
    pub fn check_bearer(&self, token: Option<&str>) -> bool {
        use renfield_core::config::AuthMode;
        match self.config.gateway.auth.mode {
            AuthMode::None => true,
            AuthMode::Token => {
                let Some(expected) = self.config.gateway.auth.token.as_deref() else { return false };
                token == Some(expected)
            }
        }
    }

    /// Placeholder `SubjectIdentity` seam kept available for REST handlers
    /// that need one before a real `AuthCollaborator` is wired in.
    pub fn anonymous_auth(&self) -> AnonymousAuth {
        AnonymousAuth
    }
}

/// Assemble the full Axum router (§6 REST surface + `/ws` Device Gateway
/// endpoint + `/webhooks/{source}` proactive-notification ingress).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .route("/webhooks/{source}", post(crate::http::webhooks::webhook_handler))
        .route("/api/chat/conversations", get(crate::http::chat::list_conversations))
        .route(
            "/api/chat/conversation/{session_id}/summary",
            get(crate::http::chat::conversation_summary),
        )
        .route("/api/chat/history/{session_id}", get(crate::http::chat::history))
        .route("/api/chat/search", get(crate::http::chat::search))
        .route("/api/chat/stats", get(crate::http::chat::stats))
        .route("/api/chat/send", post(crate::http::chat::send))
        .route("/api/chat/session/{session_id}", delete(crate::http::chat::delete_session))
        .route("/api/chat/conversations/cleanup", delete(crate::http::chat::cleanup))
        .route("/api/tools", get(crate::http::tools::list_tools))
        .route("/api/tools/status", get(crate::http::tools::status))
        .route("/api/tools/refresh", post(crate::http::tools::refresh))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
