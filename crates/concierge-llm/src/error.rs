//! Error types for chat-completion calls.

use concierge_core::error::ConciergeError;

/// Errors from the chat-completion client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API key is not configured")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode completion response: {0}")]
    Decode(String),
    #[error("completion contained no text")]
    EmptyCompletion,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::Decode(err.to_string())
        } else {
            LlmError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Decode(err.to_string())
    }
}

impl From<LlmError> for ConciergeError {
    fn from(err: LlmError) -> Self {
        ConciergeError::Llm(err.to_string())
    }
}
