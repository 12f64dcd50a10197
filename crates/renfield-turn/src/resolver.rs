//! Intent Resolver (§4.4): decides what to do with an utterance.

use std::sync::Arc;

use renfield_core::config::{
    DEFAULT_AGENT_STEP_CAP, DEFAULT_AGENT_WALL_CLOCK_CAP_SECS, DEFAULT_FEEDBACK_MATCH_THRESHOLD,
    DEFAULT_INTENT_CANDIDATE_TOP_K, DEFAULT_INTENT_CONFIDENCE_HIGH, DEFAULT_INTENT_CONFIDENCE_LOW,
};
use renfield_core::types::{Message, Plan, ToolCall, ToolDescriptor, TurnContext};
use renfield_tools::{ToolDispatcher, ToolRegistry};

use crate::collaborators::{
    FeedbackStore, IntentClassification, LlmCollaborator, NotificationLedger, RagCollaborator, RetrievedChunk,
};

/// Everything the Turn Engine needs after resolution: the plan, whatever
/// RAG context was attached, and a memory-capture fact to persist as a
/// side effect (§4.4 steps 2 and 4).
pub struct ResolvedIntent {
    pub plan: Plan,
    pub rag_sources: Option<Vec<RetrievedChunk>>,
    pub memory_fact: Option<String>,
}

pub struct IntentResolver {
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    llm: Arc<dyn LlmCollaborator>,
    rag: Option<Arc<dyn RagCollaborator>>,
    feedback: Option<Arc<dyn FeedbackStore>>,
    notifications: Option<Arc<dyn NotificationLedger>>,
    agent_enabled: bool,
}

impl IntentResolver {
    pub fn new(
        registry: Arc<ToolRegistry>,
        dispatcher: Arc<ToolDispatcher>,
        llm: Arc<dyn LlmCollaborator>,
        agent_enabled: bool,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            llm,
            rag: None,
            feedback: None,
            notifications: None,
            agent_enabled,
        }
    }

    pub fn with_rag(mut self, rag: Arc<dyn RagCollaborator>) -> Self {
        self.rag = Some(rag);
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackStore>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationLedger>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub async fn resolve(&self, ctx: &TurnContext, utterance: &str, window: &[Message]) -> ResolvedIntent {
        // Step 1: proactive-notification ack short-circuit.
        if let Some(notifications) = &self.notifications {
            if let Some(pending) = notifications.pending_for(&ctx.subject.subject_id).await {
                if let Some(action) = ack_action(utterance) {
                    notifications.ack(&pending.notification_id, action == "dismissed").await;
                    return ResolvedIntent {
                        plan: Plan::DirectAction {
                            call: ToolCall {
                                name: "core__notification_ack".to_string(),
                                arguments: serde_json::json!({
                                    "notification_id": pending.notification_id,
                                    "action": action,
                                }),
                                result: None,
                            },
                            needs_clarification: false,
                        },
                        rag_sources: None,
                        memory_fact: None,
                    };
                }
            }
        }

        // Step 2: memory capture (side effect, does not short-circuit).
        let memory_fact = extract_remembered_fact(utterance);
        if let (Some(fact), Some(feedback)) = (&memory_fact, &self.feedback) {
            feedback.record_fact(&ctx.subject.subject_id, fact).await;
        }

        // Step 3: feedback-learning retrieval.
        if let Some(feedback) = &self.feedback {
            if let Ok(embedding) = self.llm.embed(utterance).await {
                if let Some(correction) = feedback.find_correction(&embedding, DEFAULT_FEEDBACK_MATCH_THRESHOLD).await {
                    let plan = plan_from_target(&correction.corrected_target, correction.corrected_args, self.agent_enabled);
                    return ResolvedIntent { plan, rag_sources: None, memory_fact };
                }
            }
        }

        // RAG integration: attached regardless of plan type (§4.4).
        let rag_sources = if ctx.use_rag {
            match (&self.rag, &ctx.knowledge_base_id) {
                (Some(rag), Some(kb)) => rag.retrieve(utterance, kb, 5).await.ok(),
                _ => None,
            }
        } else {
            None
        };

        // Step 4: ranked intent scoring against a bounded candidate set.
        let all_tools = self.registry.tools().await;
        let candidates = top_candidates(utterance, &all_tools, DEFAULT_INTENT_CANDIDATE_TOP_K);

        let classifications = match self.llm.classify_intent(utterance, &candidates, window).await {
            Ok(c) => c,
            Err(_) => vec![IntentClassification {
                target: "conversation".to_string(),
                confidence: 0.0,
                extracted_args: serde_json::Value::Null,
            }],
        };

        let best = self.pick_best(classifications, &candidates);
        let plan = self.decide(best, &candidates);

        ResolvedIntent { plan, rag_sources, memory_fact }
    }

    /// Step 5 + tie-breaks: reduce the ranked classifications to a single
    /// decision, applying confidence → bound-args → provider-failure-rate
    /// tie-breaks in that order (§4.4).
    fn pick_best(&self, mut classifications: Vec<IntentClassification>, candidates: &[ToolDescriptor]) -> IntentClassification {
        classifications.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_bound = args_fully_bound(a, candidates);
                    let b_bound = args_fully_bound(b, candidates);
                    b_bound.cmp(&a_bound)
                })
                .then_with(|| {
                    let a_fail = provider_failure_rate(&self.dispatcher, a, candidates);
                    let b_fail = provider_failure_rate(&self.dispatcher, b, candidates);
                    a_fail.cmp(&b_fail)
                })
        });
        classifications.into_iter().next().unwrap_or(IntentClassification {
            target: "conversation".to_string(),
            confidence: 0.0,
            extracted_args: serde_json::Value::Null,
        })
    }

    fn decide(&self, best: IntentClassification, candidates: &[ToolDescriptor]) -> Plan {
        if best.confidence < DEFAULT_INTENT_CONFIDENCE_LOW {
            return Plan::Conversation { hint: None };
        }

        let is_single_tool = best.target != "conversation" && best.target != "agent";

        if best.confidence >= DEFAULT_INTENT_CONFIDENCE_HIGH && is_single_tool {
            return direct_action_plan(&best, candidates);
        }

        if self.agent_enabled {
            Plan::Agent {
                step_cap: DEFAULT_AGENT_STEP_CAP,
                wall_clock_cap_secs: DEFAULT_AGENT_WALL_CLOCK_CAP_SECS,
            }
        } else {
            Plan::Conversation { hint: Some(format!("possible intent: {}", best.target)) }
        }
    }
}

fn direct_action_plan(best: &IntentClassification, candidates: &[ToolDescriptor]) -> Plan {
    let Some(descriptor) = candidates.iter().find(|d| d.name == best.target) else {
        return Plan::Conversation { hint: Some(format!("possible intent: {}", best.target)) };
    };
    let needs_clarification = !schema_satisfied(descriptor, &best.extracted_args);
    Plan::DirectAction {
        call: ToolCall {
            name: descriptor.name.clone(),
            arguments: best.extracted_args.clone(),
            result: None,
        },
        needs_clarification,
    }
}

fn plan_from_target(target: &str, args: serde_json::Value, agent_enabled: bool) -> Plan {
    if target == "conversation" {
        Plan::Conversation { hint: None }
    } else if target == "agent" && agent_enabled {
        Plan::Agent {
            step_cap: DEFAULT_AGENT_STEP_CAP,
            wall_clock_cap_secs: DEFAULT_AGENT_WALL_CLOCK_CAP_SECS,
        }
    } else {
        Plan::DirectAction {
            call: ToolCall { name: target.to_string(), arguments: args, result: None },
            needs_clarification: false,
        }
    }
}

fn args_fully_bound(classification: &IntentClassification, candidates: &[ToolDescriptor]) -> bool {
    let Some(descriptor) = candidates.iter().find(|d| d.name == classification.target) else {
        return false;
    };
    schema_satisfied(descriptor, &classification.extracted_args)
}

fn schema_satisfied(descriptor: &ToolDescriptor, args: &serde_json::Value) -> bool {
    let Some(required) = descriptor.input_schema.get("required").and_then(|r| r.as_array()) else {
        return true;
    };
    let Some(obj) = args.as_object() else {
        return required.is_empty();
    };
    required.iter().all(|f| f.as_str().is_some_and(|name| obj.contains_key(name)))
}

fn provider_failure_rate(dispatcher: &ToolDispatcher, classification: &IntentClassification, candidates: &[ToolDescriptor]) -> usize {
    candidates
        .iter()
        .find(|d| d.name == classification.target)
        .map(|d| dispatcher.recent_failure_count(&d.provider_name))
        .unwrap_or(0)
}

/// Bound the candidate set to the top-K tools by a cheap lexical-overlap
/// proxy for embedding similarity (§4.4 step 4: "top-K candidate
/// descriptors ordered by embedding similarity to keep prompts bounded").
fn top_candidates(utterance: &str, all_tools: &[ToolDescriptor], top_k: usize) -> Vec<ToolDescriptor> {
    let words: std::collections::HashSet<String> =
        utterance.to_lowercase().split_whitespace().map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string()).collect();

    let mut scored: Vec<(f32, ToolDescriptor)> = all_tools
        .iter()
        .cloned()
        .map(|d| {
            let haystack = format!("{} {}", d.original_name.replace('_', " "), d.description).to_lowercase();
            let score = words.iter().filter(|w| !w.is_empty() && haystack.contains(w.as_str())).count() as f32;
            (score, d)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(top_k).map(|(_, d)| d).collect()
}

/// Detects an explicit long-term-fact declaration ("remember that I ...",
/// §4.4 step 2). Intentionally conservative — ambiguous phrasing is left to
/// plain conversation rather than silently capturing the wrong fact.
fn extract_remembered_fact(utterance: &str) -> Option<String> {
    let lower = utterance.to_lowercase();
    for prefix in ["remember that i ", "remember i ", "please remember that i "] {
        if let Some(idx) = lower.find(prefix) {
            let fact = utterance[idx + prefix.len()..].trim();
            if !fact.is_empty() {
                return Some(fact.to_string());
            }
        }
    }
    None
}

/// Classifies a reply to a pending notification as an ack or a dismissal,
/// or `None` if the utterance doesn't read as a reply to one at all.
fn ack_action(utterance: &str) -> Option<&'static str> {
    let lower = utterance.to_lowercase();
    let lower = lower.trim();
    const ACK_WORDS: &[&str] = &["ok", "okay", "got it", "acknowledged", "thanks", "noted", "yes"];
    const DISMISS_WORDS: &[&str] = &["dismiss", "ignore", "no thanks", "not now", "never mind"];
    if DISMISS_WORDS.iter().any(|w| lower.contains(w)) {
        Some("dismissed")
    } else if ACK_WORDS.iter().any(|w| lower == *w || lower.starts_with(w)) {
        Some("acknowledged")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use async_trait::async_trait;
    use renfield_core::types::{PermissionSet, SessionOrigin, SubjectIdentity};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct StubLlm {
        classifications: Vec<IntentClassification>,
    }

    #[async_trait]
    impl LlmCollaborator for StubLlm {
        async fn chat_stream(
            &self,
            _request: crate::collaborators::ChatRequest,
            _tx: mpsc::Sender<crate::collaborators::LlmStreamEvent>,
            _cancel: CancellationToken,
        ) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn classify_intent(
            &self,
            _utterance: &str,
            _candidates: &[ToolDescriptor],
            _context: &[Message],
        ) -> Result<Vec<IntentClassification>, CollaboratorError> {
            Ok(self.classifications.clone())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
            Ok(vec![0.0; 4])
        }
    }

    fn ctx() -> TurnContext {
        TurnContext {
            session_id: "sess-1".to_string(),
            device_id: None,
            room_id: None,
            subject: SubjectIdentity {
                subject_id: "user-1".to_string(),
                display_name: None,
                permissions: PermissionSet(vec![]),
            },
            channel: renfield_core::types::InputChannel::Text,
            origin: SessionOrigin::Rest,
            use_rag: false,
            knowledge_base_id: None,
            attachment_ids: vec![],
        }
    }

    async fn registry_with_tool() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        struct Stub(ToolDescriptor);
        #[async_trait]
        impl renfield_tools::Tool for Stub {
            fn descriptor(&self) -> ToolDescriptor {
                self.0.clone()
            }
            async fn call(&self, args: serde_json::Value, _cancel: CancellationToken) -> renfield_tools::Result<serde_json::Value> {
                Ok(args)
            }
        }
        let descriptor = ToolDescriptor {
            name: ToolDescriptor::namespaced_name("homeassistant", "turn_on"),
            provider_name: "homeassistant".to_string(),
            original_name: "turn_on".to_string(),
            description: "turn on a light".to_string(),
            input_schema: serde_json::json!({
                "type": "object", "required": ["entity_id"], "properties": {"entity_id": {"type": "string"}}
            }),
            output_shape_hint: None,
            timeout_secs: None,
        };
        registry.set_tools("homeassistant", vec![Arc::new(Stub(descriptor))]).await;
        registry.set_state("homeassistant", renfield_core::types::ProviderState::Ready).await;
        registry
    }

    #[tokio::test]
    async fn high_confidence_single_tool_yields_direct_action() {
        let registry = registry_with_tool().await;
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&registry)));
        let llm = Arc::new(StubLlm {
            classifications: vec![IntentClassification {
                target: ToolDescriptor::namespaced_name("homeassistant", "turn_on"),
                confidence: 0.95,
                extracted_args: serde_json::json!({"entity_id": "light.kitchen"}),
            }],
        });
        let resolver = IntentResolver::new(registry, dispatcher, llm, false);
        let resolved = resolver.resolve(&ctx(), "turn on the kitchen light", &[]).await;
        match resolved.plan {
            Plan::DirectAction { call, needs_clarification } => {
                assert_eq!(call.name, "homeassistant__turn_on");
                assert!(!needs_clarification);
            }
            other => panic!("expected DirectActionPlan, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_required_argument_sets_needs_clarification() {
        let registry = registry_with_tool().await;
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&registry)));
        let llm = Arc::new(StubLlm {
            classifications: vec![IntentClassification {
                target: ToolDescriptor::namespaced_name("homeassistant", "turn_on"),
                confidence: 0.9,
                extracted_args: serde_json::json!({}),
            }],
        });
        let resolver = IntentResolver::new(registry, dispatcher, llm, false);
        let resolved = resolver.resolve(&ctx(), "turn on the light", &[]).await;
        match resolved.plan {
            Plan::DirectAction { needs_clarification, .. } => assert!(needs_clarification),
            other => panic!("expected DirectActionPlan, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_confidence_yields_conversation_plan() {
        let registry = registry_with_tool().await;
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&registry)));
        let llm = Arc::new(StubLlm {
            classifications: vec![IntentClassification {
                target: ToolDescriptor::namespaced_name("homeassistant", "turn_on"),
                confidence: 0.1,
                extracted_args: serde_json::json!({}),
            }],
        });
        let resolver = IntentResolver::new(registry, dispatcher, llm, true);
        let resolved = resolver.resolve(&ctx(), "hello there", &[]).await;
        assert!(matches!(resolved.plan, Plan::Conversation { .. }));
    }

    #[tokio::test]
    async fn mid_confidence_with_agent_enabled_yields_agent_plan() {
        let registry = registry_with_tool().await;
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&registry)));
        let llm = Arc::new(StubLlm {
            classifications: vec![IntentClassification {
                target: ToolDescriptor::namespaced_name("homeassistant", "turn_on"),
                confidence: 0.5,
                extracted_args: serde_json::json!({}),
            }],
        });
        let resolver = IntentResolver::new(registry, dispatcher, llm, true);
        let resolved = resolver.resolve(&ctx(), "maybe turn something on", &[]).await;
        assert!(matches!(resolved.plan, Plan::Agent { .. }));
    }

    #[test]
    fn ack_action_recognizes_acknowledgment_and_dismissal() {
        assert_eq!(ack_action("ok thanks"), Some("acknowledged"));
        assert_eq!(ack_action("dismiss that"), Some("dismissed"));
        assert_eq!(ack_action("what's the weather"), None);
    }

    #[test]
    fn extract_remembered_fact_matches_declarative_prefix() {
        assert_eq!(
            extract_remembered_fact("remember that I prefer oat milk"),
            Some("prefer oat milk".to_string())
        );
        assert_eq!(extract_remembered_fact("what do you remember"), None);
    }
}
