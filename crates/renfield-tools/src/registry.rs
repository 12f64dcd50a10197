use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument, warn};

use renfield_core::config::ProviderTransportConfig;
use renfield_core::types::{ProviderState, ToolDescriptor};

use crate::error::{Result, ToolsError};
use crate::tool::Tool;

/// Emitted on `subscribe()` whenever a provider's lifecycle state changes
/// (§4.2 `subscribe`).
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider_name: String,
    pub state: ProviderState,
}

struct ProviderEntry {
    state: RwLock<ProviderState>,
    tools: RwLock<Vec<Arc<dyn Tool>>>,
    /// Most recent connect/handshake failure, cleared on a subsequent
    /// `ready`/`connecting` transition. Surfaced via `GET /api/tools/status`.
    last_error: RwLock<Option<String>>,
    /// How to reach this provider, set at registration time from config.
    /// `None` for a provider registered without transport info (e.g. a
    /// test double driven entirely by `set_tools`/`set_state`) — `refresh`
    /// on such a provider has nothing to reconnect to.
    transport: RwLock<Option<(ProviderTransportConfig, u64)>>,
}

/// Tracks every connected tool provider and the tools it currently exposes
/// (§4.2). One `ToolRegistry` is shared across all sessions.
pub struct ToolRegistry {
    providers: DashMap<String, ProviderEntry>,
    events: broadcast::Sender<ProviderEvent>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            providers: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Register a provider in `disconnected` state. Connection attempts
    /// happen via `refresh`.
    pub fn register_provider(&self, provider_name: &str) {
        self.providers.entry(provider_name.to_string()).or_insert_with(|| ProviderEntry {
            state: RwLock::new(ProviderState::Disconnected),
            tools: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
            transport: RwLock::new(None),
        });
    }

    /// Register a provider with the transport config `refresh` should use
    /// to (re)connect it. Called once per configured provider at startup.
    pub async fn register_provider_with_transport(&self, provider_name: &str, transport: ProviderTransportConfig, timeout_secs: u64) {
        self.register_provider(provider_name);
        if let Some(entry) = self.providers.get(provider_name) {
            *entry.transport.write().await = Some((transport, timeout_secs));
        }
    }

    #[instrument(skip(self))]
    pub async fn status(&self, provider_name: &str) -> Result<ProviderState> {
        let entry = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ToolsError::UnknownProvider(provider_name.to_string()))?;
        Ok(*entry.state.read().await)
    }

    /// Most recent connect/handshake failure recorded for this provider, if
    /// any (§6 `GET /api/tools/status`).
    pub async fn last_error(&self, provider_name: &str) -> Option<String> {
        let entry = self.providers.get(provider_name)?;
        entry.last_error.read().await.clone()
    }

    /// Transition a provider's state and notify subscribers. A transition
    /// away from `failed`/`degraded` clears any recorded `last_error`.
    #[instrument(skip(self))]
    pub async fn set_state(&self, provider_name: &str, state: ProviderState) {
        self.register_provider(provider_name);
        if let Some(entry) = self.providers.get(provider_name) {
            *entry.state.write().await = state;
            if !matches!(state, ProviderState::Failed | ProviderState::Degraded) {
                *entry.last_error.write().await = None;
            }
        }
        info!(provider = provider_name, %state, "provider state changed");
        let _ = self.events.send(ProviderEvent {
            provider_name: provider_name.to_string(),
            state,
        });
    }

    /// Record a connect/handshake failure and transition to `failed` (§4.2).
    #[instrument(skip(self, error))]
    pub async fn set_failed(&self, provider_name: &str, error: impl Into<String>) {
        self.set_state(provider_name, ProviderState::Failed).await;
        let error = error.into();
        warn!(provider = provider_name, %error, "provider connect failed");
        if let Some(entry) = self.providers.get(provider_name) {
            *entry.last_error.write().await = Some(error);
        }
    }

    /// Replace the tool set a provider exposes, typically after a
    /// successful connect or an explicit `refresh`.
    #[instrument(skip(self, tools))]
    pub async fn set_tools(&self, provider_name: &str, tools: Vec<Arc<dyn Tool>>) {
        self.register_provider(provider_name);
        if let Some(entry) = self.providers.get(provider_name) {
            *entry.tools.write().await = tools;
        }
    }

    /// All tools exposed by providers in `ready` or `degraded` state
    /// (invariant I3), namespaced `{provider}__{tool}`.
    #[instrument(skip(self))]
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        let mut out = Vec::new();
        for entry in self.providers.iter() {
            let state = *entry.state.read().await;
            if !state.exposes_tools() {
                continue;
            }
            for tool in entry.tools.read().await.iter() {
                out.push(tool.descriptor());
            }
        }
        out
    }

    /// Resolve a namespaced tool name (`{provider}__{tool}`) to its live
    /// handle, failing if the provider is not currently exposing tools.
    #[instrument(skip(self))]
    pub async fn resolve(&self, namespaced_name: &str) -> Result<Arc<dyn Tool>> {
        let (provider_name, _) = namespaced_name
            .split_once(renfield_core::types::TOOL_NAMESPACE_SEPARATOR)
            .ok_or_else(|| ToolsError::UnknownTool(namespaced_name.to_string()))?;

        let entry = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ToolsError::UnknownProvider(provider_name.to_string()))?;

        let state = *entry.state.read().await;
        if !state.exposes_tools() {
            warn!(provider = provider_name, %state, "resolve against non-exposing provider");
            return Err(ToolsError::ProviderUnavailable(provider_name.to_string()));
        }

        entry
            .tools
            .read()
            .await
            .iter()
            .find(|t| t.descriptor().name == namespaced_name)
            .cloned()
            .ok_or_else(|| ToolsError::UnknownTool(namespaced_name.to_string()))
    }

    /// Reconnect a provider and re-announce its tool set (§4.2 `refresh`).
    /// Flips to `connecting` immediately, then `ready` with the freshly
    /// listed tools on success, or `failed` with `last_error` set on
    /// failure — `tools()` never keeps serving a stale list past a failed
    /// refresh, since `set_failed` doesn't touch the existing tool set but
    /// the provider stops exposing it once it's no longer `ready`/`degraded`.
    #[instrument(skip(self))]
    pub async fn refresh(&self, provider_name: &str) -> Result<()> {
        let transport = {
            let entry = self
                .providers
                .get(provider_name)
                .ok_or_else(|| ToolsError::UnknownProvider(provider_name.to_string()))?;
            entry.transport.read().await.clone()
        };
        let Some((transport, timeout_secs)) = transport else {
            return Err(ToolsError::ProviderUnavailable(format!("{provider_name} has no transport configured")));
        };

        self.set_state(provider_name, ProviderState::Connecting).await;

        let connected = match &transport {
            ProviderTransportConfig::ChildProcessStdio { command, args } => {
                crate::stdio_provider::connect(provider_name, command, args, timeout_secs).await
            }
            ProviderTransportConfig::LongPollHttp { .. } | ProviderTransportConfig::StreamingHttp { .. } => {
                Err(ToolsError::Internal("HTTP tool-provider transports are not implemented".to_string()))
            }
        };

        match connected {
            Ok(tools) => {
                self.set_tools(provider_name, tools).await;
                self.set_state(provider_name, ProviderState::Ready).await;
                Ok(())
            }
            Err(e) => {
                self.set_failed(provider_name, e.to_string()).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    struct StubTool(ToolDescriptor);

    #[async_trait::async_trait]
    impl Tool for StubTool {
        fn descriptor(&self) -> ToolDescriptor {
            self.0.clone()
        }
        async fn call(&self, _args: serde_json::Value, _cancel: CancellationToken) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    fn descriptor(provider: &str, tool: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: ToolDescriptor::namespaced_name(provider, tool),
            provider_name: provider.to_string(),
            original_name: tool.to_string(),
            description: "stub".to_string(),
            input_schema: serde_json::json!({}),
            output_shape_hint: None,
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn tools_excludes_disconnected_providers() {
        let registry = ToolRegistry::new();
        registry.register_provider("weather");
        registry
            .set_tools("weather", vec![Arc::new(StubTool(descriptor("weather", "forecast")))])
            .await;
        assert!(registry.tools().await.is_empty());

        registry.set_state("weather", ProviderState::Ready).await;
        assert_eq!(registry.tools().await.len(), 1);
    }

    #[tokio::test]
    async fn degraded_provider_still_exposes_tools() {
        let registry = ToolRegistry::new();
        registry.set_tools("weather", vec![Arc::new(StubTool(descriptor("weather", "forecast")))]).await;
        registry.set_state("weather", ProviderState::Degraded).await;
        assert_eq!(registry.tools().await.len(), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        registry.set_state("weather", ProviderState::Ready).await;
        let err = registry.resolve("weather__nonexistent").await.unwrap_err();
        assert!(matches!(err, ToolsError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn resolve_against_disconnected_provider_errors() {
        let registry = ToolRegistry::new();
        registry
            .set_tools("weather", vec![Arc::new(StubTool(descriptor("weather", "forecast")))])
            .await;
        let err = registry.resolve("weather__forecast").await.unwrap_err();
        assert!(matches!(err, ToolsError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn refresh_without_transport_errors() {
        let registry = ToolRegistry::new();
        registry.register_provider("weather");
        let err = registry.refresh("weather").await.unwrap_err();
        assert!(matches!(err, ToolsError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn refresh_records_last_error_on_connect_failure() {
        let registry = ToolRegistry::new();
        registry
            .register_provider_with_transport(
                "weather",
                ProviderTransportConfig::ChildProcessStdio {
                    command: "/nonexistent/binary-does-not-exist".to_string(),
                    args: vec![],
                },
                5,
            )
            .await;
        assert!(registry.refresh("weather").await.is_err());
        assert_eq!(registry.status("weather").await.unwrap(), ProviderState::Failed);
        assert!(registry.last_error("weather").await.is_some());
    }

    #[tokio::test]
    async fn set_state_to_ready_clears_last_error() {
        let registry = ToolRegistry::new();
        registry.set_failed("weather", "boom").await;
        assert!(registry.last_error("weather").await.is_some());
        registry.set_state("weather", ProviderState::Ready).await;
        assert!(registry.last_error("weather").await.is_none());
    }
}
