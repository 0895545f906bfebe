//! OpenAI-compatible chat-completion client.
//!
//! Talks to any `POST {base_url}/chat/completions` endpoint (Groq by
//! default) with bearer authentication.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use concierge_core::config::LlmConfig;

use crate::error::LlmError;
use crate::types::{ChatMessage, CompletionOptions};

/// Anything that can turn a message list into a completion.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the first choice's text from a completion response body.
pub fn parse_completion(body: &str) -> Result<String, LlmError> {
    let response: CompletionResponse = serde_json::from_str(body)?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(LlmError::EmptyCompletion)
}

/// HTTP client for OpenAI-compatible completion APIs.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Build `builder` with the request timeout applied. Falls back to
/// reqwest's default client, which has no timeout, only when the builder
/// fails.
fn http_client(builder: ClientBuilder, timeout: Duration) -> Client {
    match builder.timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(
                error = %e,
                timeout_secs = timeout.as_secs(),
                "Failed to build HTTP client; requests will not time out"
            );
            Client::default()
        }
    }
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(Client::builder(), timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let start = Instant::now();

        let body = CompletionRequest {
            model: &options.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let content = parse_completion(&text)?;
        debug!(
            model = %options.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "Completion received"
        );
        Ok(content)
    }
}
