use thiserror::Error;

/// Error taxonomy shared across all components (§7).
///
/// Never exposed raw to devices — only `kind()` and `to_string()` (as
/// `error.message`) cross the wire.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("socket closed or frame malformed: {0}")]
    Transport(String),

    #[error("missing or invalid register frame: {0}")]
    Registration(String),

    #[error("a turn is already in flight for this session")]
    SessionBusy,

    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments at {path}: {message}")]
    InvalidArguments { path: String, message: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("tool call timed out")]
    ToolTimeout,

    #[error("tool call cancelled")]
    ToolCancelled,

    #[error("tool call failed: {0}")]
    ToolInternalError(String),

    #[error("LLM collaborator unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM collaborator timed out")]
    LlmTimeout,

    #[error("RAG collaborator unavailable")]
    RagUnavailable,

    #[error("TTS collaborator unavailable")]
    TtsUnavailable,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Short wire-safe taxonomy name, as used in §7's kind list and in
    /// `error.message` framing — never includes provider internals.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Transport(_) => "TransportError",
            CoreError::Registration(_) => "RegistrationError",
            CoreError::SessionBusy => "SessionBusy",
            CoreError::StoreUnavailable(_) => "StoreUnavailable",
            CoreError::UnknownTool(_) => "UnknownTool",
            CoreError::InvalidArguments { .. } => "InvalidArguments",
            CoreError::ProviderUnavailable(_) => "ProviderUnavailable",
            CoreError::RateLimited { .. } => "RateLimited",
            CoreError::ToolTimeout => "ToolTimeout",
            CoreError::ToolCancelled => "ToolCancelled",
            CoreError::ToolInternalError(_) => "ToolInternalError",
            CoreError::LlmUnavailable(_) => "LLMUnavailable",
            CoreError::LlmTimeout => "LLMTimeout",
            CoreError::RagUnavailable => "RAGUnavailable",
            CoreError::TtsUnavailable => "TTSUnavailable",
            CoreError::Config(_) => "ConfigError",
            CoreError::AuthFailed(_) => "AuthFailed",
            CoreError::Serialization(_) => "SerializationError",
            CoreError::Database(_) => "DatabaseError",
            CoreError::Internal(_) => "InternalError",
        }
    }

    /// Whether a Dispatcher-facing error should be retried once with jitter
    /// (§4.3 step 6: transport-reset or 5xx is retriable, else terminal).
    pub fn is_retriable_transport_error(&self) -> bool {
        matches!(
            self,
            CoreError::Transport(_) | CoreError::ProviderUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
