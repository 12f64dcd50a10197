use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("message not found: session {session_id} sequence {sequence}")]
    MessageNotFound { session_id: String, sequence: i64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for renfield_core::error::CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SessionNotFound(id) => {
                renfield_core::error::CoreError::StoreUnavailable(format!("unknown session {id}"))
            }
            StoreError::MessageNotFound { session_id, sequence } => {
                renfield_core::error::CoreError::StoreUnavailable(format!(
                    "no message at sequence {sequence} in session {session_id}"
                ))
            }
            StoreError::Database(e) => renfield_core::error::CoreError::Database(e),
            StoreError::Serialization(e) => renfield_core::error::CoreError::Serialization(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
