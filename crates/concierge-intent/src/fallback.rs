//! Contextual tier: decides a label for messages the fast tier could not
//! place, using the conversation so far.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use concierge_core::types::{render_transcript, IntentLabel, Role, Turn};
use concierge_llm::{ChatCompletionClient, ChatMessage, CompletionOptions};

use crate::error::IntentError;
use crate::fast::SemanticRouter;

/// A backend that names a label given history and the new message.
///
/// The answer is free text; [`coerce_label`] maps it onto the closed label
/// set.
#[async_trait]
pub trait ContextualClassifier: Send + Sync {
    async fn decide(&self, history: &[Turn], text: &str) -> Result<String, IntentError>;
}

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("valid fence regex"));

/// Map a backend answer onto a label.
///
/// Accepts a JSON object with a `label` field or a bare label name, with
/// surrounding quotes, punctuation and case ignored. Anything else is
/// `None`.
pub fn coerce_label(raw: &str) -> Option<IntentLabel> {
    let mut text = raw.trim();
    if let Some(caps) = FENCE.captures(text) {
        text = caps.get(1).map(|m| m.as_str()).unwrap_or(text).trim();
    }

    let candidate = if text.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        value.get("label")?.as_str()?.to_string()
    } else {
        text.to_string()
    };

    candidate
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
        .parse()
        .ok()
}

// =============================================================================
// LLM-backed
// =============================================================================

const CLASSIFIER_PROMPT: &str = "You route messages for an e-commerce shopping assistant. \
Classify the user's newest message into exactly one label:\n\
- faq: store policies, orders, shipping, returns, payments, accounts\n\
- product_inquiry: finding, comparing, pricing or buying products, including follow-ups about products mentioned earlier\n\
- small_talk: greetings, thanks, jokes, questions about the assistant\n\
- default: anything else\n\
Use the conversation to resolve words like \"those\" or \"it\". \
Reply with JSON only, for example {\"label\": \"faq\"}.";

/// Asks a chat model to pick the label.
pub struct LlmContextualClassifier {
    client: Arc<dyn ChatCompletionClient>,
    options: CompletionOptions,
    history_window: usize,
}

impl LlmContextualClassifier {
    pub fn new(client: Arc<dyn ChatCompletionClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            options: CompletionOptions::new(model)
                .with_temperature(0.0)
                .with_max_tokens(32),
            history_window: 10,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    fn build_messages(&self, history: &[Turn], text: &str) -> Vec<ChatMessage> {
        let start = history.len().saturating_sub(self.history_window);
        let transcript = render_transcript(&history[start..]);
        let transcript = if transcript.is_empty() {
            "(no earlier messages)".to_string()
        } else {
            transcript
        };
        vec![
            ChatMessage::system(CLASSIFIER_PROMPT),
            ChatMessage::user(format!(
                "Conversation so far:\n{}\n\nNewest message: {}",
                transcript, text
            )),
        ]
    }
}

#[async_trait]
impl ContextualClassifier for LlmContextualClassifier {
    async fn decide(&self, history: &[Turn], text: &str) -> Result<String, IntentError> {
        let messages = self.build_messages(history, text);
        Ok(self.client.complete(&messages, &self.options).await?)
    }
}

// =============================================================================
// Model-free
// =============================================================================

static REFERENTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(those|these|them|they|it|that|this|one|ones|which|same|other|another)\b")
        .expect("valid referential regex")
});

/// Offline contextual tier: a message that refers back ("which of those")
/// inherits the label of the most recent earlier user message the fast
/// tier can place. Everything else is `default`.
#[derive(Debug, Clone)]
pub struct ReferentialContextClassifier {
    router: SemanticRouter,
}

impl ReferentialContextClassifier {
    pub fn new(router: SemanticRouter) -> Self {
        Self { router }
    }
}

#[async_trait]
impl ContextualClassifier for ReferentialContextClassifier {
    async fn decide(&self, history: &[Turn], text: &str) -> Result<String, IntentError> {
        if !REFERENTIAL.is_match(text) {
            return Ok(IntentLabel::Default.to_string());
        }
        for turn in history.iter().rev().filter(|t| t.role == Role::User) {
            if let Some(label) = self.router.classify_fast(&turn.content).await {
                return Ok(label.to_string());
            }
        }
        Ok(IntentLabel::Default.to_string())
    }
}
