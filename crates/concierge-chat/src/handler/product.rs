//! Product inquiry handler.
//!
//! Two model calls per request: the first turns the question (plus recent
//! history, so "those" and "them" resolve) into a catalog query, the second
//! summarises the rows that query returned. A query that fails to execute
//! is treated like an empty result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use concierge_core::types::{IntentLabel, RoutedRequest};
use concierge_llm::{ChatCompletionClient, ChatMessage, CompletionOptions};
use concierge_storage::{ProductCatalog, PRODUCT_SCHEMA};

use crate::error::HandlerError;
use crate::handler::IntentHandler;

pub const NO_PRODUCTS_REPLY: &str =
    "I'm sorry, I couldn't find any products matching that request right now.";

const SQL_INSTRUCTIONS: &str = "Convert the user's latest question into a single SQLite SELECT query \
against the schema below.\n\
Rules:\n\
- Output ONLY the SQL, with no explanation and no code fences.\n\
- When the user refers to earlier results (\"those\", \"them\", \"it\"), reuse the filters from the previous question.\n\
- For \"cheapest\" use ORDER BY price ASC LIMIT 1; for \"most expensive\" use ORDER BY price DESC LIMIT 1.\n\
- Match text case-insensitively with LIKE '%term%' on title, brand or category.\n\
- Always SELECT title, price, avg_rating, product_link, discount.\n\
- Do not add filters the user did not ask for.";

const SUMMARY_PROMPT: &str = "You are a helpful shopping assistant. Answer the user's question using \
the database results.\n\
- Show prices in Thai Baht (THB) with two decimals. Never use \"$\".\n\
- If the question follows up on an earlier one, acknowledge that briefly.\n\
- Highlight the top 1-3 products.\n\
- Format product links as [**Title**](product_link).\n\
- Show ratings with a star, e.g. 4.5 ⭐.";

pub struct ProductHandler {
    catalog: ProductCatalog,
    llm: Arc<dyn ChatCompletionClient>,
    sql_options: CompletionOptions,
    summary_options: CompletionOptions,
    history_window: usize,
    summary_rows: usize,
}

impl ProductHandler {
    pub fn new(
        catalog: ProductCatalog,
        llm: Arc<dyn ChatCompletionClient>,
        model: impl Into<String>,
        history_window: usize,
        summary_rows: usize,
    ) -> Self {
        let model = model.into();
        Self {
            catalog,
            llm,
            sql_options: CompletionOptions::new(model.clone()).with_temperature(0.2),
            summary_options: CompletionOptions::new(model).with_temperature(0.3),
            history_window,
            summary_rows,
        }
    }

    async fn generate_query(&self, request: &RoutedRequest) -> Result<String, HandlerError> {
        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\n{}",
            SQL_INSTRUCTIONS, PRODUCT_SCHEMA
        ))];
        messages.extend(ChatMessage::from_history(&request.history, self.history_window));
        messages.push(ChatMessage::user(request.raw_text.clone()));

        Ok(self.llm.complete(&messages, &self.sql_options).await?)
    }

    /// Execute on the blocking pool. Failures are logged and yield no rows.
    async fn run_query(&self, sql: String) -> Vec<Map<String, Value>> {
        let catalog = self.catalog.clone();
        match tokio::task::spawn_blocking(move || catalog.query(&sql)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!(error = %e, "Catalog query failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Catalog query task panicked");
                Vec::new()
            }
        }
    }

    fn summary_input(&self, question: &str, rows: &[Map<String, Value>]) -> String {
        let shown = &rows[..rows.len().min(self.summary_rows)];
        let rendered = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());
        format!("User Question: {}\nDatabase Results: {}", question, rendered)
    }
}

#[async_trait]
impl IntentHandler for ProductHandler {
    fn label(&self) -> IntentLabel {
        IntentLabel::ProductInquiry
    }

    async fn handle(&self, request: &RoutedRequest) -> Result<String, HandlerError> {
        let sql = self.generate_query(request).await?;
        debug!(sql = %sql, "Generated catalog query");

        let rows = self.run_query(sql).await;
        if rows.is_empty() {
            info!("No products matched");
            return Ok(NO_PRODUCTS_REPLY.to_string());
        }

        let mut messages = vec![ChatMessage::system(SUMMARY_PROMPT)];
        messages.extend(ChatMessage::from_history(&request.history, self.history_window));
        messages.push(ChatMessage::user(self.summary_input(&request.raw_text, &rows)));

        info!(rows = rows.len(), "Summarising catalog results");
        Ok(self.llm.complete(&messages, &self.summary_options).await?)
    }
}
