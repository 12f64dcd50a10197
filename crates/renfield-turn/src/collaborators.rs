//! Traits for the external collaborators §1 names as out of scope: the LLM
//! engine, the speech recognizer/synthesizer, the RAG retrieval service, and
//! the auth policy owner. No concrete implementation lives in this crate —
//! only the seam the Intent Resolver and Turn Engine call through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use renfield_core::types::{Message, SubjectIdentity};

/// One token/thinking/tool-use event from a streaming chat completion,
/// grounded in `skynet-agent::stream::StreamEvent`.
#[derive(Debug, Clone)]
pub enum LlmStreamEvent {
    TextDelta(String),
    ToolUse { name: String, arguments: serde_json::Value },
    Done,
    Error(String),
}

/// A request to the chat collaborator — system prompt, context window, and
/// the tool descriptors currently visible to the Resolver.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub context: Vec<Message>,
    pub tools: Vec<renfield_core::types::ToolDescriptor>,
}

/// Structured output of the ranked intent-scoring step (§4.4 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    /// `"conversation"`, `"agent"`, or a namespaced tool name.
    pub target: String,
    pub confidence: f32,
    #[serde(default)]
    pub extracted_args: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("LLM collaborator unavailable: {0}")]
    LlmUnavailable(String),
    #[error("LLM collaborator timed out")]
    LlmTimeout,
    #[error("RAG collaborator unavailable")]
    RagUnavailable,
    #[error("TTS collaborator unavailable")]
    TtsUnavailable,
    #[error("STT collaborator unavailable")]
    SttUnavailable,
    #[error("auth failed: {0}")]
    AuthFailed(String),
}

/// The streaming/classifying chat engine (§1 Non-goals: "the large-language-
/// model engine" is external; this is its contract).
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Stream a chat completion, forwarding events on `tx` until `Done` or
    /// `Error`. Cancellation-aware: the implementation must stop sending on
    /// `cancel.cancelled()`.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<LlmStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), CollaboratorError>;

    /// Structured-output intent classification (§4.4 step 4). `candidates`
    /// is already bounded to the top-K by embedding similarity. Returns one
    /// scored entry per candidate (plus, where warranted, a `"conversation"`
    /// or `"agent"` pseudo-target), ranked highest confidence first, so the
    /// Resolver can apply the §4.4 tie-break rules itself rather than have
    /// them buried in the collaborator's own ranking.
    async fn classify_intent(
        &self,
        utterance: &str,
        candidates: &[renfield_core::types::ToolDescriptor],
        context: &[Message],
    ) -> Result<Vec<IntentClassification>, CollaboratorError>;

    /// Embed text for similarity search (candidate ranking, feedback-match
    /// lookup). Returns a dense vector; dimensionality is collaborator-owned.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// Speech-to-text collaborator. Voice frames are forwarded here to produce
/// the text transcript the Turn Engine treats identically to a `text` frame.
#[async_trait]
pub trait SttCollaborator: Send + Sync {
    async fn transcribe(&self, pcm16_chunks: Vec<Vec<u8>>) -> Result<String, CollaboratorError>;
}

/// Text-to-speech collaborator. Invoked only for voice-origin turns that
/// resolved an audio-output device (§4.5 step 8, §4.6).
#[async_trait]
pub trait TtsCollaborator: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        tx: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Result<(), CollaboratorError>;
}

/// A single retrieved chunk handed back to the Resolver/Engine for prompt
/// injection (§4.4 "RAG integration").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait RagCollaborator: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        knowledge_base_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError>;
}

/// Resolves a caller's bearer token/cookie into a `SubjectIdentity` (§1,
/// §11 of SPEC_FULL — the core consumes this, it never owns accounts).
#[async_trait]
pub trait AuthCollaborator: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<SubjectIdentity, CollaboratorError>;
}

/// A prior human correction of the Resolver's decision for a similar
/// utterance (§4.4 step 3, "feedback-learning retrieval").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub embedding: Vec<f32>,
    pub pattern: String,
    pub corrected_target: String,
    pub corrected_args: serde_json::Value,
}

/// Long-term fact storage and correction lookups. Out of scope for this core
/// is *how* facts are embedded or stored durably — only the seam the
/// Resolver calls (§4.4 steps 2 and 3).
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn record_fact(&self, subject_id: &str, fact: &str);
    async fn find_correction(&self, embedding: &[f32], threshold: f32) -> Option<CorrectionRecord>;
}

/// A notification still awaiting acknowledgment from its target subject
/// (§4.4 step 1, §4.6, §11 of SPEC_FULL). Owned and fanned-out by the
/// Gateway; the Resolver only reads it to short-circuit an ack-shaped reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    pub notification_id: String,
    pub subject_id: String,
    pub title: String,
}

/// Read/write seam onto the Gateway's in-memory pending/acked ledger.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// The most recent still-pending notification addressed to `subject_id`,
    /// if any — used to detect an ack-shaped reply (§4.4 step 1).
    async fn pending_for(&self, subject_id: &str) -> Option<PendingNotification>;

    /// Idempotent: acking an already-acked notification is a no-op success
    /// (§8 idempotence).
    async fn ack(&self, notification_id: &str, dismissed: bool);
}
