//! "Unavailable" collaborator stand-ins (§1 Non-goals: the LLM engine, STT,
//! TTS, RAG, and auth policy are all external). No concrete provider ships
//! in this workspace — these exist only so the binary links and runs
//! end-to-end against the real trait seams from `renfield-turn`; an
//! operator wires a real collaborator in by swapping the `Arc<dyn ...>` the
//! Gateway constructs in `app::AppState::new`.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use renfield_core::types::{Message, PermissionSet, SubjectIdentity, ToolDescriptor};
use renfield_turn::{
    AuthCollaborator, ChatRequest, CollaboratorError, IntentClassification, LlmCollaborator, LlmStreamEvent,
    RagCollaborator, RetrievedChunk, SttCollaborator, TtsCollaborator,
};

pub struct UnavailableLlm;

#[async_trait]
impl LlmCollaborator for UnavailableLlm {
    async fn chat_stream(
        &self,
        _request: ChatRequest,
        _tx: mpsc::Sender<LlmStreamEvent>,
        _cancel: CancellationToken,
    ) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::LlmUnavailable("no LLM collaborator configured".to_string()))
    }

    async fn classify_intent(
        &self,
        _utterance: &str,
        _candidates: &[ToolDescriptor],
        _context: &[Message],
    ) -> Result<Vec<IntentClassification>, CollaboratorError> {
        Err(CollaboratorError::LlmUnavailable("no LLM collaborator configured".to_string()))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::LlmUnavailable("no LLM collaborator configured".to_string()))
    }
}

pub struct UnavailableStt;

#[async_trait]
impl SttCollaborator for UnavailableStt {
    async fn transcribe(&self, _pcm16_chunks: Vec<Vec<u8>>) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::SttUnavailable)
    }
}

pub struct UnavailableTts;

#[async_trait]
impl TtsCollaborator for UnavailableTts {
    async fn synthesize(
        &self,
        _text: &str,
        _tx: mpsc::Sender<Vec<u8>>,
        _cancel: CancellationToken,
    ) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::TtsUnavailable)
    }
}

pub struct UnavailableRag;

#[async_trait]
impl RagCollaborator for UnavailableRag {
    async fn retrieve(&self, _query: &str, _knowledge_base_id: &str, _top_k: usize) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        Err(CollaboratorError::RagUnavailable)
    }
}

/// Resolves every bearer token to an anonymous subject with no permissions.
/// Real deployments swap this for a collaborator backed by their own
/// identity provider (§1, §11 of SPEC_FULL — the core never owns accounts).
pub struct AnonymousAuth;

#[async_trait]
impl AuthCollaborator for AnonymousAuth {
    async fn resolve(&self, _token: &str) -> Result<SubjectIdentity, CollaboratorError> {
        Ok(SubjectIdentity {
            subject_id: "anonymous".to_string(),
            display_name: None,
            permissions: PermissionSet(vec![]),
        })
    }
}
