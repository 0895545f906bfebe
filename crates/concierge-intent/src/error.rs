//! Error types for intent classification.
//!
//! These never escape [`crate::TwoTierClassifier`]: the fast tier maps them
//! to "no match" and the contextual tier maps them to `default`.

use concierge_core::error::ConciergeError;
use concierge_llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("similarity backend not initialized")]
    NotInitialized,
    #[error("embedding error: {0}")]
    Embedding(String),
    #[error("classifier backend error: {0}")]
    Backend(String),
}

impl From<ConciergeError> for IntentError {
    fn from(err: ConciergeError) -> Self {
        match err {
            ConciergeError::Embedding(msg) => IntentError::Embedding(msg),
            other => IntentError::Backend(other.to_string()),
        }
    }
}

impl From<LlmError> for IntentError {
    fn from(err: LlmError) -> Self {
        IntentError::Backend(err.to_string())
    }
}
