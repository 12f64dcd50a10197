use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use renfield_core::config::DEFAULT_TOOL_CALL_TIMEOUT_SECS;
use renfield_core::types::{ToolError, ToolOutcome};

use crate::breaker::BreakerRegistry;
use crate::ratelimit::RateLimiterRegistry;
use crate::registry::ToolRegistry;

/// Per-call execution result. `ok=false` is not a Rust error — tool failures
/// flow back to the Turn Engine as data so the LLM can narrate them (§4.3,
/// §7: "Tool errors never fail the turn").
pub type ToolDispatchOutcome = ToolOutcome;

/// Single-call execution with a consistent envelope (§4.3).
///
/// Owns no provider state itself — consults the shared `ToolRegistry` for
/// resolution, the shared `BreakerRegistry`/`RateLimiterRegistry` for the
/// per-provider call slot (§5), and a per-call timeout/retry policy.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    breakers: BreakerRegistry,
    limiters: RateLimiterRegistry,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            breakers: BreakerRegistry::new(),
            limiters: RateLimiterRegistry::new(),
        }
    }

    pub fn set_rate_limit(&self, provider_name: &str, requests_per_minute: u32) {
        self.limiters.set_budget(provider_name, requests_per_minute);
    }

    /// Recent failure count for a provider, consulted by the Intent
    /// Resolver's tie-break rule (§4.4: "prefer the provider with the lower
    /// recent failure rate").
    pub fn recent_failure_count(&self, provider_name: &str) -> usize {
        self.breakers.recent_failure_count(provider_name)
    }

    /// Run the §4.3 execution contract for one tool call.
    ///
    /// Never returns `Err` for tool-domain failures — those are folded into
    /// `ToolOutcome{ok: false, error: Some(..)}` so callers never branch on
    /// exceptions for a tool-facing boundary (§9 design note).
    #[instrument(skip(self, arguments, cancel), fields(tool_name))]
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        // 1. Resolve provider via Registry.
        let tool = match self.registry.resolve(tool_name).await {
            Ok(t) => t,
            Err(e) => return outcome_err("UnknownTool", e.to_string(), false),
        };
        let provider_name = tool.descriptor().provider_name;

        // 2. Validate arguments against the descriptor's schema.
        if let Err((path, message)) = validate_arguments(&tool.descriptor().input_schema, &arguments) {
            return outcome_err("InvalidArguments", format!("{path}: {message}"), false);
        }

        // 3. Consult the circuit breaker.
        if !self.breakers.allow(&provider_name) {
            return outcome_err("ProviderUnavailable", format!("circuit open for {provider_name}"), true);
        }

        // 4. Consult the rate limiter.
        if !self.limiters.acquire(&provider_name).await {
            return outcome_err("RateLimited", "rate limit exceeded".to_string(), true);
        }

        // 5-7. Invoke with timeout, classify, retry once if retriable.
        let timeout = Duration::from_secs(tool.descriptor().timeout_secs.unwrap_or(DEFAULT_TOOL_CALL_TIMEOUT_SECS));
        let first = self.call_once(&tool, &arguments, cancel.clone(), timeout).await;

        match first {
            Ok(value) => {
                self.breakers.record_success(&provider_name);
                ToolOutcome { ok: true, value: Some(value), error: None }
            }
            Err(e) if e.retriable && !cancel.is_cancelled() => {
                let jitter_ms = rand::thread_rng().gen_range(20..150);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                match self.call_once(&tool, &arguments, cancel, timeout).await {
                    Ok(value) => {
                        self.breakers.record_success(&provider_name);
                        ToolOutcome { ok: true, value: Some(value), error: None }
                    }
                    Err(e2) => {
                        self.breakers.record_failure(&provider_name);
                        outcome_err(&e2.kind, e2.message, e2.retriable)
                    }
                }
            }
            Err(e) => {
                self.breakers.record_failure(&provider_name);
                outcome_err(&e.kind, e.message, e.retriable)
            }
        }
    }

    async fn call_once(
        &self,
        tool: &Arc<dyn crate::tool::Tool>,
        arguments: &serde_json::Value,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<serde_json::Value, ClassifiedError> {
        if cancel.is_cancelled() {
            return Err(ClassifiedError {
                kind: "ToolCancelled".to_string(),
                message: "turn cancelled before call".to_string(),
                retriable: false,
            });
        }

        let call = tool.call(arguments.clone(), cancel.clone());
        tokio::select! {
            res = tokio::time::timeout(timeout, call) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(classify(&e)),
                Err(_) => Err(ClassifiedError {
                    kind: "ToolTimeout".to_string(),
                    message: format!("tool call exceeded {}s", timeout.as_secs()),
                    retriable: false,
                }),
            },
            _ = cancel.cancelled() => Err(ClassifiedError {
                kind: "ToolCancelled".to_string(),
                message: "turn cancelled mid-call".to_string(),
                retriable: false,
            }),
        }
    }
}

struct ClassifiedError {
    kind: String,
    message: String,
    retriable: bool,
}

fn classify(e: &crate::error::ToolsError) -> ClassifiedError {
    use crate::error::ToolsError;
    match e {
        ToolsError::Internal(msg) => {
            let retriable = msg.contains("reset") || msg.contains("timed out") || msg.contains("5");
            ClassifiedError { kind: "ToolInternalError".to_string(), message: msg.clone(), retriable }
        }
        other => ClassifiedError { kind: "ToolInternalError".to_string(), message: other.to_string(), retriable: false },
    }
}

fn outcome_err(kind: &str, message: String, retriable: bool) -> ToolOutcome {
    warn!(kind, %message, "tool dispatch failed");
    ToolOutcome {
        ok: false,
        value: None,
        error: Some(ToolError { kind: kind.to_string(), message, retriable }),
    }
}

/// Minimal JSON-schema-shaped validator covering what tool descriptors
/// actually declare: object `type`, `required`, and per-property `type`.
/// Returns `(path, message)` on the first violation.
///
/// Deliberately hand-rolled rather than a general JSON Schema engine: tool
/// descriptors in this core only ever declare the object/required/type
/// subset (§3 ToolDescriptor, §4.3 step 2), and a full validator would carry
/// a dependency this subset doesn't need.
fn validate_arguments(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), (String, String)> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if schema_obj.get("type").and_then(|t| t.as_str()) == Some("object") && !arguments.is_object() {
        return Err(("$".to_string(), "expected an object".to_string()));
    }

    let args_obj = arguments.as_object();

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        for field in required {
            let Some(name) = field.as_str() else { continue };
            let present = args_obj.is_some_and(|o| o.contains_key(name));
            if !present {
                return Err((format!("$.{name}"), "required property missing".to_string()));
            }
        }
    }

    if let (Some(properties), Some(args)) = (schema_obj.get("properties").and_then(|p| p.as_object()), args_obj) {
        for (name, value) in args {
            let Some(prop_schema) = properties.get(name).and_then(|p| p.as_object()) else { continue };
            let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) else { continue };
            if !type_matches(expected_type, value) {
                return Err((format!("$.{name}"), format!("expected {expected_type}")));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;
    use async_trait::async_trait;
    use renfield_core::types::ToolDescriptor;

    struct EchoTool {
        descriptor: ToolDescriptor,
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn descriptor(&self) -> ToolDescriptor {
            self.descriptor.clone()
        }
        async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> crate::error::Result<serde_json::Value> {
            let remaining = self.fail_times.load(std::sync::atomic::Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                return Err(crate::error::ToolsError::Internal("transient reset".to_string()));
            }
            Ok(args)
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: ToolDescriptor::namespaced_name("demo", name),
            provider_name: "demo".to_string(),
            original_name: name.to_string(),
            description: "test".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "required": ["entity_id"],
                "properties": {"entity_id": {"type": "string"}}
            }),
            output_shape_hint: None,
            timeout_secs: None,
        }
    }

    async fn dispatcher_with(tool: Arc<dyn Tool>) -> ToolDispatcher {
        let registry = Arc::new(ToolRegistry::new());
        registry.set_tools("demo", vec![tool]).await;
        registry.set_state("demo", renfield_core::types::ProviderState::Ready).await;
        ToolDispatcher::new(registry)
    }

    #[tokio::test]
    async fn unknown_tool_reports_unknown_tool() {
        let d = dispatcher_with(Arc::new(EchoTool {
            descriptor: descriptor("turn_on"),
            fail_times: 0.into(),
        }))
        .await;
        let outcome = d.dispatch("demo__nonexistent", serde_json::json!({}), CancellationToken::new()).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.unwrap().kind, "UnknownTool");
    }

    #[tokio::test]
    async fn missing_required_argument_is_invalid_arguments() {
        let d = dispatcher_with(Arc::new(EchoTool {
            descriptor: descriptor("turn_on"),
            fail_times: 0.into(),
        }))
        .await;
        let outcome = d.dispatch("demo__turn_on", serde_json::json!({}), CancellationToken::new()).await;
        assert!(!outcome.ok);
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, "InvalidArguments");
        assert!(err.message.contains("entity_id"));
    }

    #[tokio::test]
    async fn successful_call_returns_value() {
        let d = dispatcher_with(Arc::new(EchoTool {
            descriptor: descriptor("turn_on"),
            fail_times: 0.into(),
        }))
        .await;
        let outcome = d
            .dispatch("demo__turn_on", serde_json::json!({"entity_id": "light.kitchen"}), CancellationToken::new())
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.value.unwrap()["entity_id"], "light.kitchen");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let d = dispatcher_with(Arc::new(EchoTool {
            descriptor: descriptor("turn_on"),
            fail_times: 1.into(),
        }))
        .await;
        let outcome = d
            .dispatch("demo__turn_on", serde_json::json!({"entity_id": "light.kitchen"}), CancellationToken::new())
            .await;
        assert!(outcome.ok, "single transient failure should be absorbed by the retry");
    }

    #[tokio::test]
    async fn cancelled_before_call_reports_tool_cancelled() {
        let d = dispatcher_with(Arc::new(EchoTool {
            descriptor: descriptor("turn_on"),
            fail_times: 0.into(),
        }))
        .await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = d
            .dispatch("demo__turn_on", serde_json::json!({"entity_id": "light.kitchen"}), cancel)
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.error.unwrap().kind, "ToolCancelled");
    }
}
