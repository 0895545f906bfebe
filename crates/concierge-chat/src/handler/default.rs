//! Catch-all handler for messages no other intent covers.

use async_trait::async_trait;

use concierge_core::types::{IntentLabel, RoutedRequest};

use crate::error::HandlerError;
use crate::handler::IntentHandler;

pub const DEFAULT_REPLY: &str = "Sorry, I cannot handle this type of question yet.";

#[derive(Debug, Clone, Default)]
pub struct DefaultHandler;

#[async_trait]
impl IntentHandler for DefaultHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::Default
    }

    async fn handle(&self, _request: &RoutedRequest) -> Result<String, HandlerError> {
        Ok(DEFAULT_REPLY.to_string())
    }
}
