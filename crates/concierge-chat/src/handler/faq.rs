//! FAQ handler: retrieval over the knowledge base, answered from stored
//! answers when available and by the model otherwise.
//!
//! Entries scoring below the handler's minimum similarity are dropped
//! before either path, so a weak match never supplies the answer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use concierge_core::types::{IntentLabel, RoutedRequest};
use concierge_llm::{ChatCompletionClient, ChatMessage, CompletionOptions};
use concierge_vector::{FaqHit, KnowledgeBase};

use crate::cache::QueryCache;
use crate::error::HandlerError;
use crate::handler::IntentHandler;

const SYSTEM_PROMPT: &str = "You are an e-commerce support assistant. Use ONLY the provided \
context to answer. If the answer is not in the context, say you don't have that information yet.";

const DEFAULT_MIN_SCORE: f64 = 0.5;

pub struct FaqHandler {
    knowledge: Arc<KnowledgeBase>,
    llm: Arc<dyn ChatCompletionClient>,
    options: CompletionOptions,
    n_results: usize,
    min_score: f64,
    cache: QueryCache<Vec<FaqHit>>,
}

impl FaqHandler {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        llm: Arc<dyn ChatCompletionClient>,
        model: impl Into<String>,
        n_results: usize,
        cache_capacity: usize,
    ) -> Self {
        Self {
            knowledge,
            llm,
            options: CompletionOptions::new(model)
                .with_temperature(0.3)
                .with_max_tokens(512),
            n_results,
            min_score: DEFAULT_MIN_SCORE,
            cache: QueryCache::new(cache_capacity),
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Top entries for `query`, served from the cache when possible.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<FaqHit>, HandlerError> {
        if let Some(hits) = self.cache.get(query, self.n_results).await {
            debug!(query, "FAQ cache hit");
            return Ok(hits);
        }
        let hits = self.knowledge.query(query, self.n_results).await?;
        self.cache.put(query, self.n_results, hits.clone()).await;
        Ok(hits)
    }

    pub fn cache(&self) -> &QueryCache<Vec<FaqHit>> {
        &self.cache
    }

    fn context_prompt(query: &str, hits: &[FaqHit]) -> String {
        let blocks: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let mut block = format!("[Source {} from faq]\nQ: {}", i + 1, hit.question);
                if let Some(answer) = hit.stored_answer() {
                    block.push_str(&format!("\nA: {}", answer));
                }
                block
            })
            .collect();
        let context = if blocks.is_empty() {
            "(No contextual documents retrieved)".to_string()
        } else {
            blocks.join("\n\n")
        };
        format!(
            "Context containing Q/A pairs from knowledge base:\n{}\n\nUser question: {}\n\n\
             Answer ONLY using the provided answers. If insufficient, say you don't have that information yet.",
            context, query
        )
    }
}

#[async_trait]
impl IntentHandler for FaqHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::Faq
    }

    async fn handle(&self, request: &RoutedRequest) -> Result<String, HandlerError> {
        let retrieved = self.retrieve(&request.raw_text).await?;
        let hits: Vec<FaqHit> = retrieved
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .collect();
        debug!(relevant = hits.len(), min_score = self.min_score, "FAQ retrieval");

        if let Some(answer) = hits.iter().find_map(FaqHit::stored_answer) {
            info!(hits = hits.len(), "Answered FAQ from stored answer");
            return Ok(answer.to_string());
        }

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::context_prompt(&request.raw_text, &hits)),
        ];
        Ok(self.llm.complete(&messages, &self.options).await?)
    }
}
