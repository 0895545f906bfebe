//! Concierge LLM crate - chat-completion client used by the fallback
//! classifier and the FAQ, product and small-talk handlers.

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{ChatCompletionClient, OpenAiCompatibleClient};
pub use error::LlmError;
pub use mock::MockCompletionClient;
pub use types::{ChatMessage, CompletionOptions, MessageRole};
