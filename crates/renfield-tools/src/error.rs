use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("tool call timed out")]
    Timeout,

    #[error("tool call cancelled")]
    Cancelled,

    #[error("invalid arguments at {path}: {message}")]
    InvalidArguments { path: String, message: String },

    #[error("tool execution failed: {0}")]
    Internal(String),
}

impl From<ToolsError> for renfield_core::error::CoreError {
    fn from(e: ToolsError) -> Self {
        use renfield_core::error::CoreError;
        match e {
            ToolsError::UnknownTool(t) => CoreError::UnknownTool(t),
            ToolsError::UnknownProvider(p) => CoreError::ProviderUnavailable(p),
            ToolsError::ProviderUnavailable(p) => CoreError::ProviderUnavailable(p),
            ToolsError::CircuitOpen(p) => CoreError::ProviderUnavailable(format!("{p} (circuit open)")),
            ToolsError::RateLimited { retry_after_ms } => CoreError::RateLimited { retry_after_ms },
            ToolsError::Timeout => CoreError::ToolTimeout,
            ToolsError::Cancelled => CoreError::ToolCancelled,
            ToolsError::InvalidArguments { path, message } => CoreError::InvalidArguments { path, message },
            ToolsError::Internal(m) => CoreError::ToolInternalError(m),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolsError>;
