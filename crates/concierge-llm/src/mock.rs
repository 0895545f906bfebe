//! Scripted completion client for tests and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::ChatCompletionClient;
use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionOptions};

type Responder =
    Box<dyn Fn(&[ChatMessage], &CompletionOptions) -> Result<String, LlmError> + Send + Sync>;

/// Completion client whose answers come from a closure.
///
/// Records every request so tests can assert on the prompts sent.
pub struct MockCompletionClient {
    responder: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl std::fmt::Debug for MockCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCompletionClient")
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockCompletionClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage], &CompletionOptions) -> Result<String, LlmError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Always fail with an HTTP error.
    pub fn failing() -> Self {
        Self::new(|_, _| Err(LlmError::Http("connection refused".to_string())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages of every request received so far.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatCompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        (self.responder)(messages, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_reply_records_requests() {
        let client = MockCompletionClient::fixed("ok");
        let reply = client
            .complete(&[ChatMessage::user("ping")], &CompletionOptions::new("m"))
            .await
            .unwrap();
        assert_eq!(reply, "ok");
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.requests()[0][0].content, "ping");
    }

    #[tokio::test]
    async fn test_responder_sees_options() {
        let client = MockCompletionClient::new(|_, options| Ok(options.model.clone()));
        let reply = client
            .complete(&[], &CompletionOptions::new("small-model"))
            .await
            .unwrap();
        assert_eq!(reply, "small-model");
    }

    #[tokio::test]
    async fn test_failing() {
        let client = MockCompletionClient::failing();
        assert!(client
            .complete(&[], &CompletionOptions::new("m"))
            .await
            .is_err());
    }
}
