use serde::{Deserialize, Serialize};

use concierge_core::types::{Role, Turn};

/// Author of a chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a chat-completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Replay a stored conversation turn as a prompt message.
    pub fn from_turn(turn: &Turn) -> Self {
        match turn.role {
            Role::User => Self::user(turn.content.clone()),
            Role::Assistant => Self::assistant(turn.content.clone()),
        }
    }

    /// The last `window` turns as prompt messages, oldest first.
    pub fn from_history(history: &[Turn], window: usize) -> Vec<Self> {
        let start = history.len().saturating_sub(window);
        history[start..].iter().map(Self::from_turn).collect()
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
