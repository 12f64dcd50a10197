use thiserror::Error;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a turn is already in flight for this session")]
    SessionBusy,

    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("LLM collaborator unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM collaborator timed out")]
    LlmTimeout,

    #[error("turn cancelled")]
    Cancelled,
}

impl From<TurnError> for renfield_core::error::CoreError {
    fn from(e: TurnError) -> Self {
        use renfield_core::error::CoreError;
        match e {
            TurnError::SessionBusy => CoreError::SessionBusy,
            TurnError::StoreUnavailable(m) => CoreError::StoreUnavailable(m),
            TurnError::LlmUnavailable(m) => CoreError::LlmUnavailable(m),
            TurnError::LlmTimeout => CoreError::LlmTimeout,
            TurnError::Cancelled => CoreError::ToolCancelled,
        }
    }
}

impl From<renfield_store::StoreError> for TurnError {
    fn from(e: renfield_store::StoreError) -> Self {
        TurnError::StoreUnavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TurnError>;
