//! Conversational handler for greetings and chit-chat.

use std::sync::Arc;

use async_trait::async_trait;

use concierge_core::types::{IntentLabel, RoutedRequest};
use concierge_llm::{ChatCompletionClient, ChatMessage, CompletionOptions};

use crate::error::HandlerError;
use crate::handler::IntentHandler;

const PERSONA: &str = "You are a friendly and helpful customer support assistant for an e-commerce \
platform. Engage in small talk with users while subtly promoting our products and services. \
Keep the conversation light-hearted and enjoyable.";

pub struct SmallTalkHandler {
    llm: Arc<dyn ChatCompletionClient>,
    options: CompletionOptions,
    history_window: usize,
}

impl SmallTalkHandler {
    pub fn new(
        llm: Arc<dyn ChatCompletionClient>,
        model: impl Into<String>,
        history_window: usize,
    ) -> Self {
        Self {
            llm,
            options: CompletionOptions::new(model).with_temperature(0.7),
            history_window,
        }
    }
}

#[async_trait]
impl IntentHandler for SmallTalkHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::SmallTalk
    }

    async fn handle(&self, request: &RoutedRequest) -> Result<String, HandlerError> {
        let mut messages = vec![ChatMessage::system(PERSONA)];
        messages.extend(ChatMessage::from_history(&request.history, self.history_window));
        messages.push(ChatMessage::user(request.raw_text.clone()));
        Ok(self.llm.complete(&messages, &self.options).await?)
    }
}
