//! Intent Resolver + Turn Engine (§4.4, §4.5): the orchestration layer that
//! turns one user utterance into a persisted, plan-executed, optionally
//! spoken reply.

pub mod collaborators;
pub mod error;
pub mod resolver;
pub mod session_registry;
pub mod turn;

pub use collaborators::{
    AuthCollaborator, ChatRequest, CollaboratorError, FeedbackStore, IntentClassification, LlmCollaborator,
    LlmStreamEvent, NotificationLedger, PendingNotification, RagCollaborator, RetrievedChunk, SttCollaborator,
    TtsCollaborator,
};
pub use error::{Result, TurnError};
pub use resolver::{IntentResolver, ResolvedIntent};
pub use session_registry::SessionRegistry;
pub use turn::{TurnEngine, TurnEvent, TurnOutcome, TurnRequest};
