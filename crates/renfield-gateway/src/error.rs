use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Gateway-local error taxonomy — REST handlers and the WS connection loop
/// map these onto HTTP status codes or `ServerFrame::Error` respectively
/// (§7's shared `kind` taxonomy is what crosses the wire; this just routes
/// to it).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("authentication failed")]
    Unauthorized,

    #[error(transparent)]
    Store(#[from] renfield_store::StoreError),

    #[error(transparent)]
    Tools(#[from] renfield_tools::ToolsError),

    #[error(transparent)]
    Turn(#[from] renfield_turn::TurnError),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::SessionNotFound(_) => "SessionNotFound",
            GatewayError::BadRequest(_) => "BadRequest",
            GatewayError::Unauthorized => "AuthFailed",
            GatewayError::Store(_) => "StoreUnavailable",
            GatewayError::Tools(e) => tools_error_kind(e),
            GatewayError::Turn(e) => turn_error_kind(e),
        }
    }
}

fn turn_error_kind(e: &renfield_turn::TurnError) -> &'static str {
    use renfield_turn::TurnError::*;
    match e {
        SessionBusy => "SessionBusy",
        StoreUnavailable(_) => "StoreUnavailable",
        LlmUnavailable(_) => "LLMUnavailable",
        LlmTimeout => "LLMTimeout",
        Cancelled => "ToolCancelled",
    }
}

fn tools_error_kind(e: &renfield_tools::ToolsError) -> &'static str {
    use renfield_tools::ToolsError::*;
    match e {
        UnknownTool(_) => "UnknownTool",
        UnknownProvider(_) => "ProviderUnavailable",
        ProviderUnavailable(_) => "ProviderUnavailable",
        CircuitOpen(_) => "ProviderUnavailable",
        RateLimited { .. } => "RateLimited",
        Timeout => "ToolTimeout",
        Cancelled => "ToolCancelled",
        InvalidArguments { .. } => "InvalidArguments",
        Internal(_) => "ToolInternalError",
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Store(renfield_store::StoreError::SessionNotFound(_)) => StatusCode::NOT_FOUND,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Tools(renfield_tools::ToolsError::UnknownTool(_) | renfield_tools::ToolsError::UnknownProvider(_)) => {
                StatusCode::NOT_FOUND
            }
            GatewayError::Tools(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Turn(renfield_turn::TurnError::SessionBusy) => StatusCode::CONFLICT,
            GatewayError::Turn(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let kind = self.kind();
        (status, Json(serde_json::json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}
