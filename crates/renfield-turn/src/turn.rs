//! Turn Engine (§4.5): runs exactly one turn end-to-end for one session.
//!
//! Flow mirrors `skynet-agent::tools::tool_loop::run_tool_loop` — build a
//! message history, call the model, act on what comes back, repeat — but
//! streaming rather than request/response, cancellable, and fanned out as
//! `ServerFrame` events instead of returned as a single `ChatResponse`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use renfield_core::types::{Message, MessageRole, Plan, TurnContext};
use renfield_protocol::frames::ServerFrame;
use renfield_store::ConversationStore;
use renfield_tools::{ToolDispatcher, ToolRegistry};

use crate::collaborators::{LlmCollaborator, LlmStreamEvent, TtsCollaborator};
use crate::error::{Result, TurnError};
use crate::resolver::IntentResolver;
use crate::session_registry::SessionRegistry;

/// Everything the engine needs to run one turn, independent of how the
/// Gateway discovered the originating device or routed audio output — that
/// routing decision (§4.6) is made by the caller, not here.
pub struct TurnRequest {
    pub ctx: TurnContext,
    pub utterance: String,
    /// Every event this turn emits for the originating device goes here,
    /// in emission order (§5: "no reordering is permitted by the Gateway").
    pub events_tx: mpsc::Sender<ServerFrame>,
    /// `Some` only for a voice-origin turn that resolved an audio-output
    /// device (§4.6); `None` means TTS is skipped regardless of channel.
    pub audio_tx: Option<mpsc::Sender<ServerFrame>>,
    pub cancel: CancellationToken,
}

/// How a turn ended, reported back to the Gateway so it can decide what to
/// tell the device beyond what the Turn Engine already emitted.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// Ran to completion; `Done` was emitted.
    Completed { intent: Option<String> },
    /// Cancelled mid-flight (§5: no `Done` is emitted; the Gateway sends
    /// `session_end{reason:cancelled}` itself).
    Cancelled,
}

/// Internal re-export kept for callers that want to match on the raw stream
/// events without depending on `renfield_turn::collaborators` directly.
pub type TurnEvent = LlmStreamEvent;

/// Orchestrates the Intent Resolver and LLM/Dispatcher/TTS collaborators for
/// one turn at a time per session (invariant I1, enforced by `SessionRegistry`).
pub struct TurnEngine {
    store: Arc<ConversationStore>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<ToolDispatcher>,
    resolver: Arc<IntentResolver>,
    sessions: Arc<SessionRegistry>,
    llm: Arc<dyn LlmCollaborator>,
    tts: Option<Arc<dyn TtsCollaborator>>,
    chat_model: String,
    system_prompt: String,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConversationStore>,
        registry: Arc<ToolRegistry>,
        dispatcher: Arc<ToolDispatcher>,
        resolver: Arc<IntentResolver>,
        sessions: Arc<SessionRegistry>,
        llm: Arc<dyn LlmCollaborator>,
        chat_model: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            resolver,
            sessions,
            llm,
            tts: None,
            chat_model: chat_model.into(),
            system_prompt: system_prompt.into(),
        }
    }

    pub fn with_tts(mut self, tts: Arc<dyn TtsCollaborator>) -> Self {
        self.tts = Some(tts);
        self
    }

    /// Run one turn per the §4.5 lifecycle. Steps 1-9 map directly onto the
    /// numbered lifecycle in the spec; the inline comments below cite them.
    #[instrument(skip(self, req), fields(session_id = %req.ctx.session_id))]
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnOutcome> {
        let TurnRequest { ctx, utterance, events_tx, audio_tx, cancel } = req;

        // Step 1: acquire the session turn mutex. A held lock means another
        // turn is in flight for this session (I1) — reject, don't queue;
        // the Gateway's FIFO queue is what serializes retries.
        let _guard = self
            .sessions
            .try_begin_turn(&ctx.session_id)
            .ok_or(TurnError::SessionBusy)?;

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Cancelled);
        }

        // A store outage in step 2 and step 3 is still one failure from the
        // device's point of view — emit `StoreUnavailable` at most once per
        // turn (§4.5 failure handling: "emit one informational event").
        let mut store_unavailable_sent = false;

        // Step 2: context window, sized by origin. A transient failure is
        // retried once with jitter before the turn degrades to in-memory.
        let window_size = ctx.origin.context_window_size();
        let window = match retry_store_op(|| self.store.window(&ctx.session_id, window_size)).await {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "conversation store unavailable, continuing turn in memory");
                store_unavailable_sent = true;
                let _ = events_tx
                    .send(ServerFrame::error(Some(ctx.session_id.clone()), "StoreUnavailable", e.to_string()))
                    .await;
                Vec::new()
            }
        };

        // Step 3: persist the user message. A store failure here degrades
        // the same way — the turn proceeds with an in-memory-only entry.
        let user_metadata = user_message_metadata(&ctx);
        let user_message =
            match retry_store_op(|| self.store.append(&ctx.session_id, MessageRole::User, &utterance, user_metadata.clone())).await {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(error = %e, "failed to persist user message, continuing in memory");
                    if !store_unavailable_sent {
                        store_unavailable_sent = true;
                        let _ = events_tx
                            .send(ServerFrame::error(Some(ctx.session_id.clone()), "StoreUnavailable", e.to_string()))
                            .await;
                    }
                    None
                }
            };

        // Step 4: resolve intent.
        let resolved = self.resolver.resolve(&ctx, &utterance, &window).await;
        if let Some(sources) = &resolved.rag_sources {
            let _ = events_tx
                .send(ServerFrame::RagContext {
                    session_id: ctx.session_id.clone(),
                    has_context: true,
                    sources: Some(sources.iter().map(|s| serde_json::to_value(s).unwrap_or_default()).collect()),
                })
                .await;
        } else if ctx.use_rag {
            let _ = events_tx
                .send(ServerFrame::RagContext { session_id: ctx.session_id.clone(), has_context: false, sources: None })
                .await;
        }

        let mut context = window.clone();
        if let Some(m) = &user_message {
            context.push(m.clone());
        } else {
            context.push(scratch_message(&ctx.session_id, MessageRole::User, &utterance));
        }
        if let Some(sources) = &resolved.rag_sources {
            for chunk in sources {
                context.push(scratch_message(
                    &ctx.session_id,
                    MessageRole::Tool,
                    &format!("retrieved from {}: {}", chunk.source, chunk.text),
                ));
            }
        }

        // Step 5-6: execute the plan and accumulate the reply text. Run to
        // completion rather than racing `cancel` at this outer level — the
        // plan's own streaming loops already watch `cancel` per-chunk and
        // return whatever was produced so far, which we still want to
        // persist as a partial message below.
        let (reply_text, intent, degraded) = self.execute_plan(&ctx, &resolved.plan, &context, &events_tx, &cancel).await;

        if cancel.is_cancelled() {
            // Persist whatever was produced, tagged partial, but emit no `done`.
            if !reply_text.is_empty() {
                if let Ok(assistant) =
                    retry_store_op(|| self.store.append(&ctx.session_id, MessageRole::Assistant, &reply_text, intent_metadata(&intent))).await
                {
                    let _ = self.store.mark_partial(&ctx.session_id, assistant.sequence);
                }
            }
            return Ok(TurnOutcome::Cancelled);
        }

        // Step 7: persist the assistant message and emit `done`.
        let persisted =
            retry_store_op(|| self.store.append(&ctx.session_id, MessageRole::Assistant, &reply_text, intent_metadata(&intent))).await;
        if let Err(e) = &persisted {
            warn!(error = %e, "failed to persist assistant message");
            if !store_unavailable_sent {
                store_unavailable_sent = true;
                let _ = events_tx
                    .send(ServerFrame::error(Some(ctx.session_id.clone()), "StoreUnavailable", e.to_string()))
                    .await;
            }
        }

        let wants_tts = matches!(ctx.channel, renfield_core::types::InputChannel::Voice) && audio_tx.is_some() && self.tts.is_some();

        let _ = events_tx
            .send(ServerFrame::Done {
                session_id: ctx.session_id.clone(),
                tts_handled: wants_tts,
                intent: intent.clone(),
            })
            .await;

        // Step 8: synthesize speech for a voice-origin turn with a resolved
        // audio-output device. Text-origin turns never synthesize.
        if wants_tts {
            if let (Some(tts), Some(audio_tx)) = (&self.tts, &audio_tx) {
                self.speak(tts.as_ref(), &ctx.session_id, &reply_text, audio_tx, cancel.clone()).await;
            }
        }

        if degraded {
            info!(session_id = %ctx.session_id, "turn completed with a degraded collaborator");
        }

        // Step 9: the mutex guard drops at the end of this scope.
        Ok(TurnOutcome::Completed { intent })
    }

    /// Execute a resolved plan (§4.5 step 5), returning the accumulated
    /// reply text, the matched intent name (if any), and whether a
    /// collaborator-level failure was absorbed rather than propagated.
    async fn execute_plan(
        &self,
        ctx: &TurnContext,
        plan: &Plan,
        context: &[Message],
        events_tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> (String, Option<String>, bool) {
        match plan {
            Plan::Conversation { hint } => {
                let mut messages = context.to_vec();
                if let Some(hint) = hint {
                    messages.push(scratch_message(&ctx.session_id, MessageRole::Tool, hint));
                }
                let (text, degraded) = self.stream_reply(ctx, messages, events_tx, cancel).await;
                (text, None, degraded)
            }
            Plan::DirectAction { call, needs_clarification } if *needs_clarification => {
                let mut messages = context.to_vec();
                messages.push(scratch_message(
                    &ctx.session_id,
                    MessageRole::Tool,
                    &format!("the request to call {} is missing required arguments; ask the user to clarify", call.name),
                ));
                let (text, degraded) = self.stream_reply(ctx, messages, events_tx, cancel).await;
                (text, Some(call.name.clone()), degraded)
            }
            Plan::DirectAction { call, .. } => {
                let outcome = self.dispatcher.dispatch(&call.name, call.arguments.clone(), cancel.clone()).await;
                let _ = events_tx
                    .send(ServerFrame::Action {
                        session_id: ctx.session_id.clone(),
                        intent: call.name.clone(),
                        result: serde_json::to_value(&outcome).unwrap_or_default(),
                    })
                    .await;

                let mut messages = context.to_vec();
                messages.push(scratch_message(
                    &ctx.session_id,
                    MessageRole::Tool,
                    &serde_json::to_string(&outcome).unwrap_or_default(),
                ));
                let (text, degraded) = self.stream_reply(ctx, messages, events_tx, cancel).await;
                (text, Some(call.name.clone()), degraded || !outcome.ok)
            }
            Plan::Agent { step_cap, wall_clock_cap_secs } => {
                self.run_agent_loop(ctx, context, *step_cap, *wall_clock_cap_secs, events_tx, cancel).await
            }
        }
    }

    /// AgentPlan loop (§4.5 step 5, §5: "tool calls ... executed strictly
    /// sequentially"). Each iteration asks the LLM for the next step; a
    /// `ToolUse` event dispatches and loops, anything else ends the turn.
    async fn run_agent_loop(
        &self,
        ctx: &TurnContext,
        context: &[Message],
        step_cap: u32,
        wall_clock_cap_secs: u64,
        events_tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> (String, Option<String>, bool) {
        let deadline = Instant::now() + Duration::from_secs(wall_clock_cap_secs);
        let mut messages = context.to_vec();
        let mut last_tool: Option<String> = None;
        let mut degraded = false;

        for step in 0..step_cap {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }

            let tools = self.resolver_tools().await;
            let request = crate::collaborators::ChatRequest {
                model: self.chat_model.clone(),
                system_prompt: self.system_prompt.clone(),
                context: messages.clone(),
                tools,
            };

            let _ = events_tx
                .send(ServerFrame::AgentThinking { session_id: ctx.session_id.clone(), content: format!("step {step}") })
                .await;

            let (tx, mut rx) = mpsc::channel(16);
            let call = self.llm.chat_stream(request, tx, cancel.clone());
            tokio::pin!(call);

            let mut step_text = String::new();
            let mut tool_use: Option<(String, serde_json::Value)> = None;
            let mut saw_error = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(LlmStreamEvent::TextDelta(delta)) => {
                            let _ = events_tx.send(ServerFrame::Stream { session_id: ctx.session_id.clone(), delta: delta.clone() }).await;
                            step_text.push_str(&delta);
                        }
                        Some(LlmStreamEvent::ToolUse { name, arguments }) => {
                            tool_use = Some((name, arguments));
                        }
                        Some(LlmStreamEvent::Done) => break,
                        Some(LlmStreamEvent::Error(msg)) => {
                            warn!(error = %msg, "LLM collaborator reported an error mid-agent-loop");
                            saw_error = true;
                            break;
                        }
                        None => break,
                    },
                    res = &mut call => {
                        if let Err(e) = res {
                            warn!(error = %e, "LLM collaborator call failed in agent loop");
                            saw_error = true;
                        }
                        break;
                    }
                }
            }

            if cancel.is_cancelled() {
                return (step_text, last_tool, degraded);
            }

            let Some((tool_name, arguments)) = tool_use else {
                // Final answer: no tool call this step, terminate normally.
                return (step_text, last_tool, degraded || saw_error);
            };

            let _ = events_tx
                .send(ServerFrame::AgentToolCall { session_id: ctx.session_id.clone(), tool: tool_name.clone(), arguments: arguments.clone() })
                .await;
            let outcome = self.dispatcher.dispatch(&tool_name, arguments, cancel.clone()).await;
            let _ = events_tx
                .send(ServerFrame::AgentToolResult {
                    session_id: ctx.session_id.clone(),
                    tool: tool_name.clone(),
                    success: outcome.ok,
                    result: outcome.value.clone(),
                })
                .await;

            degraded = degraded || saw_error || !outcome.ok;
            last_tool = Some(tool_name.clone());
            messages.push(scratch_message(&ctx.session_id, MessageRole::Assistant, &step_text));
            messages.push(scratch_message(
                &ctx.session_id,
                MessageRole::Tool,
                &serde_json::to_string(&outcome).unwrap_or_default(),
            ));
        }

        warn!(session_id = %ctx.session_id, step_cap, "agent loop terminated by step or wall-clock cap");
        (String::new(), last_tool, true)
    }

    /// Stream a plain chat completion, forwarding `stream` events as they
    /// arrive and accumulating the full text for persistence.
    async fn stream_reply(
        &self,
        ctx: &TurnContext,
        messages: Vec<Message>,
        events_tx: &mpsc::Sender<ServerFrame>,
        cancel: &CancellationToken,
    ) -> (String, bool) {
        let request = crate::collaborators::ChatRequest {
            model: self.chat_model.clone(),
            system_prompt: self.system_prompt.clone(),
            context: messages,
            tools: Vec::new(),
        };

        let (tx, mut rx) = mpsc::channel(32);
        let call = self.llm.chat_stream(request, tx, cancel.clone());
        tokio::pin!(call);

        let mut text = String::new();
        let mut degraded = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(LlmStreamEvent::TextDelta(delta)) => {
                        let _ = events_tx.send(ServerFrame::Stream { session_id: ctx.session_id.clone(), delta: delta.clone() }).await;
                        text.push_str(&delta);
                    }
                    Some(LlmStreamEvent::ToolUse { .. }) => {
                        // A plain ConversationPlan never requests tools; ignore.
                    }
                    Some(LlmStreamEvent::Done) => break,
                    Some(LlmStreamEvent::Error(msg)) => {
                        // LLM failure mid-stream: finalize with what we have,
                        // append a diagnostic suffix, still emit `done` (§4.5).
                        warn!(error = %msg, "LLM collaborator reported an error mid-stream");
                        text.push_str("\n\n[response interrupted: the assistant is temporarily unavailable]");
                        degraded = true;
                        break;
                    }
                    None => break,
                },
                res = &mut call => {
                    if let Err(e) = res {
                        warn!(error = %e, "LLM collaborator call failed");
                        if text.is_empty() {
                            text.push_str("I'm unable to respond right now.");
                        } else {
                            text.push_str("\n\n[response interrupted: the assistant is temporarily unavailable]");
                        }
                        degraded = true;
                    }
                    break;
                }
            }
        }

        (text, degraded)
    }

    async fn resolver_tools(&self) -> Vec<renfield_core::types::ToolDescriptor> {
        // The agent loop shows every currently exposed tool, same set the
        // Resolver scores against (§4.4 step 4), just unbounded by top-K —
        // the agent's own step cap is what keeps this loop finite.
        self.registry.tools().await
    }

    /// Synthesize speech and deliver audio chunks to the resolved
    /// audio-output device (§4.5 step 8, §4.6 routing — already decided by
    /// the caller).
    async fn speak(
        &self,
        tts: &dyn TtsCollaborator,
        session_id: &str,
        text: &str,
        audio_tx: &mpsc::Sender<ServerFrame>,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);
        let audio_tx = audio_tx.clone();
        let session_id = session_id.to_string();
        let forward = async move {
            // Buffer one chunk behind so the last one sent can be flagged
            // `is_final` without the collaborator needing to know its own
            // stream's end in advance.
            let mut pending = rx.recv().await;
            while let Some(chunk) = pending {
                pending = rx.recv().await;
                let encoded = base64::engine::general_purpose::STANDARD.encode(&chunk);
                let _ = audio_tx
                    .send(ServerFrame::TtsAudio { session_id: session_id.clone(), audio: encoded, is_final: pending.is_none() })
                    .await;
            }
        };
        let synth = tts.synthesize(text, tx, cancel);
        tokio::join!(synth, forward).0.unwrap_or_else(|e| warn!(error = %e, "TTS synthesis failed"));
    }
}

fn user_message_metadata(ctx: &TurnContext) -> serde_json::Value {
    serde_json::json!({
        "device_id": ctx.device_id,
        "room_id": ctx.room_id,
        "channel": ctx.channel,
    })
}

fn intent_metadata(intent: &Option<String>) -> serde_json::Value {
    serde_json::json!({ "intent": intent })
}

/// Run a fallible synchronous store operation, retrying once with jitter on
/// failure before giving up (§4.5 failure handling: "writes are retried at
/// most once with jitter; a second failure surfaces `StoreUnavailable`").
/// Mirrors `ToolDispatcher::dispatch`'s retry-once-with-jitter shape.
async fn retry_store_op<T>(mut op: impl FnMut() -> renfield_store::error::Result<T>) -> renfield_store::error::Result<T> {
    match op() {
        Ok(v) => Ok(v),
        Err(_) => {
            let jitter_ms = rand::thread_rng().gen_range(20..150);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            op()
        }
    }
}

/// A non-persisted `Message` used to thread tool results and hints through
/// the LLM context for a single turn, never written to the store.
fn scratch_message(session_id: &str, role: MessageRole, content: &str) -> Message {
    Message {
        id: 0,
        session_id: session_id.to_string(),
        sequence: 0,
        role,
        content: content.to_string(),
        metadata: serde_json::Value::Null,
        timestamp: Utc::now(),
        partial: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ChatRequest, CollaboratorError, IntentClassification};
    use async_trait::async_trait;
    use renfield_core::types::{InputChannel, PermissionSet, SessionOrigin, SubjectIdentity};
    use renfield_tools::ToolRegistry;
    use rusqlite::Connection;

    struct ScriptedLlm {
        classification: IntentClassification,
        reply: &'static str,
    }

    #[async_trait]
    impl LlmCollaborator for ScriptedLlm {
        async fn chat_stream(
            &self,
            _request: ChatRequest,
            tx: mpsc::Sender<LlmStreamEvent>,
            _cancel: CancellationToken,
        ) -> std::result::Result<(), CollaboratorError> {
            let _ = tx.send(LlmStreamEvent::TextDelta(self.reply.to_string())).await;
            let _ = tx.send(LlmStreamEvent::Done).await;
            Ok(())
        }

        async fn classify_intent(
            &self,
            _utterance: &str,
            _candidates: &[renfield_core::types::ToolDescriptor],
            _context: &[Message],
        ) -> std::result::Result<Vec<IntentClassification>, CollaboratorError> {
            Ok(vec![self.classification.clone()])
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, CollaboratorError> {
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
            channel: InputChannel::Text,
            origin: SessionOrigin::Rest,
            use_rag: false,
            knowledge_base_id: None,
            attachment_ids: vec![],
        }
    }

    fn engine(reply: &'static str) -> TurnEngine {
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::clone(&registry)));
        let llm = Arc::new(ScriptedLlm {
            classification: IntentClassification { target: "conversation".to_string(), confidence: 0.0, extracted_args: serde_json::Value::Null },
            reply,
        });
        let resolver = Arc::new(IntentResolver::new(Arc::clone(&registry), Arc::clone(&dispatcher), llm.clone(), false));
        let store = Arc::new(ConversationStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let sessions = Arc::new(SessionRegistry::new());
        TurnEngine::new(store, registry, dispatcher, resolver, sessions, llm, "test-model", "be helpful")
    }

    #[tokio::test]
    async fn conversation_turn_streams_and_persists() {
        let engine = engine("hello there");
        let (tx, mut rx) = mpsc::channel(16);
        let req = TurnRequest {
            ctx: ctx(),
            utterance: "hi".to_string(),
            events_tx: tx,
            audio_tx: None,
            cancel: CancellationToken::new(),
        };
        let outcome = engine.run_turn(req).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));

        let mut saw_stream = false;
        let mut saw_done = false;
        while let Ok(frame) = rx.try_recv() {
            match frame {
                ServerFrame::Stream { delta, .. } => {
                    saw_stream = true;
                    assert_eq!(delta, "hello there");
                }
                ServerFrame::Done { tts_handled, .. } => {
                    saw_done = true;
                    assert!(!tts_handled);
                }
                _ => {}
            }
        }
        assert!(saw_stream && saw_done);

        let window = engine.store.window("sess-1", 10).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, MessageRole::User);
        assert_eq!(window[1].content, "hello there");
    }

    #[tokio::test]
    async fn second_concurrent_turn_is_rejected() {
        let engine = engine("hi");
        let _guard = engine.sessions.try_begin_turn("sess-1").unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let req = TurnRequest {
            ctx: ctx(),
            utterance: "hi".to_string(),
            events_tx: tx,
            audio_tx: None,
            cancel: CancellationToken::new(),
        };
        let err = engine.run_turn(req).await.unwrap_err();
        assert!(matches!(err, TurnError::SessionBusy));
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_cancelled_without_done() {
        let engine = engine("hi");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::channel(16);
        let req = TurnRequest { ctx: ctx(), utterance: "hi".to_string(), events_tx: tx, audio_tx: None, cancel };
        let outcome = engine.run_turn(req).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
        assert!(rx.try_recv().is_err(), "a cancelled turn emits no events");
    }
}
