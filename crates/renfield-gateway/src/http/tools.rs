use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;

use renfield_core::config::ProviderTransportConfig;
use renfield_protocol::rest::{RefreshResponse, ToolStatusEntry, ToolsResponse};

use crate::app::AppState;
use crate::error::GatewayError;

/// `GET /api/tools` — every tool currently exposed by a ready or degraded
/// provider (§4.2 invariant I3, §6).
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ToolsResponse> {
    let tools = state.tool_registry.tools().await;
    Json(ToolsResponse { total: tools.len(), tools })
}

/// `GET /api/tools/status` — one entry per configured provider, regardless
/// of whether it currently exposes tools (unlike `tools()`, which hides a
/// disconnected provider entirely).
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ToolStatusEntry>>, GatewayError> {
    let tools = state.tool_registry.tools().await;
    let mut entries = Vec::with_capacity(state.config.providers.entries.len());
    for provider in &state.config.providers.entries {
        let provider_state = state.tool_registry.status(&provider.name).await?;
        let tool_count = tools.iter().filter(|t| t.provider_name == provider.name).count();
        let last_error = state.tool_registry.last_error(&provider.name).await;
        entries.push(ToolStatusEntry {
            provider_name: provider.name.clone(),
            state: provider_state,
            transport: transport_name(&provider.transport),
            tool_count,
            last_error,
        });
    }
    Ok(Json(entries))
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    /// Providers to refresh; absent or empty means every configured provider.
    #[serde(default)]
    pub providers: Vec<String>,
}

/// `POST /api/tools/refresh` — ask the named providers (or all, if none are
/// named) to re-announce their tool set (§4.2 `refresh`).
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RefreshRequest>>,
) -> Result<Json<RefreshResponse>, GatewayError> {
    let requested = body.map(|Json(r)| r.providers).unwrap_or_default();
    let targets: Vec<String> = if requested.is_empty() {
        state.config.providers.entries.iter().map(|p| p.name.clone()).collect()
    } else {
        requested
    };

    let mut reconnected = 0;
    for name in &targets {
        match state.tool_registry.refresh(name).await {
            Ok(()) => reconnected += 1,
            Err(e) => tracing::warn!(provider = %name, error = %e, "refresh failed"),
        }
    }
    Ok(Json(RefreshResponse { servers_reconnected: reconnected }))
}

fn transport_name(transport: &ProviderTransportConfig) -> &'static str {
    match transport {
        ProviderTransportConfig::ChildProcessStdio { .. } => "child-process-stdio",
        ProviderTransportConfig::LongPollHttp { .. } => "long-poll-http",
        ProviderTransportConfig::StreamingHttp { .. } => "streaming-http",
    }
}
