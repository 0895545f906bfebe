//! Error types for the conversational core.

use concierge_core::error::ConciergeError;
use concierge_llm::LlmError;

/// Errors returned to callers of [`crate::DialogueRouter::route`].
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ChatError {
    /// Whether resending the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::StoreUnavailable(_))
    }
}

/// Errors raised inside an intent handler. The router never surfaces
/// these; it replies with an apology instead.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),
    #[error("handler unavailable: {0}")]
    Unavailable(String),
}

impl From<LlmError> for HandlerError {
    fn from(err: LlmError) -> Self {
        HandlerError::Llm(err.to_string())
    }
}

impl From<ConciergeError> for HandlerError {
    fn from(err: ConciergeError) -> Self {
        match err {
            ConciergeError::Catalog(msg) => HandlerError::Catalog(msg),
            ConciergeError::Embedding(msg) => HandlerError::KnowledgeBase(msg),
            ConciergeError::Llm(msg) => HandlerError::Llm(msg),
            other => HandlerError::Unavailable(other.to_string()),
        }
    }
}
