//! FAQ knowledge base: question/answer pairs indexed by question embedding.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use concierge_core::error::ConciergeError;

use crate::embedding::DynEmbeddingService;
use crate::index::VectorIndex;

/// One FAQ record as stored in the data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    /// Curated answer. Entries without one are still retrievable and feed
    /// the generated-answer path.
    #[serde(default)]
    pub answer: Option<String>,
}

/// A retrieved FAQ entry with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct FaqHit {
    pub question: String,
    pub answer: Option<String>,
    pub score: f64,
}

impl FaqHit {
    /// The stored answer, trimmed, if it carries any text.
    pub fn stored_answer(&self) -> Option<&str> {
        self.answer
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

/// Read FAQ entries from a JSON array file.
pub fn load_faq_file(path: &Path) -> Result<Vec<FaqEntry>, ConciergeError> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<FaqEntry> = serde_json::from_str(&content)?;
    info!(path = %path.display(), count = entries.len(), "Loaded FAQ data");
    Ok(entries)
}

/// Vector-backed FAQ store.
#[derive(Clone)]
pub struct KnowledgeBase {
    index: VectorIndex,
    embedder: Arc<dyn DynEmbeddingService>,
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("entries", &self.index.len())
            .finish()
    }
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            index: VectorIndex::new(),
            embedder,
        }
    }

    /// Embed and index the given entries.
    ///
    /// Skipped entirely when the index already holds at least as many
    /// entries, so repeated startup ingestion is a no-op. Returns the number
    /// of entries inserted.
    pub async fn ingest(&self, entries: &[FaqEntry]) -> Result<usize, ConciergeError> {
        let existing = self.index.len();
        if existing >= entries.len() {
            info!(existing, total = entries.len(), "Skipping FAQ ingestion");
            return Ok(0);
        }

        let mut inserted = 0;
        for entry in entries {
            if entry.question.trim().is_empty() {
                debug!("Skipping FAQ entry with blank question");
                continue;
            }
            let embedding = self.embedder.embed_boxed(&entry.question).await?;
            let metadata = serde_json::json!({ "answer": entry.answer });
            self.index
                .insert(Uuid::new_v4(), embedding, entry.question.clone(), metadata)?;
            inserted += 1;
        }

        info!(inserted, total = self.index.len(), "FAQ ingestion complete");
        Ok(inserted)
    }

    /// Return up to `n` entries most similar to `text`, best first.
    pub async fn query(&self, text: &str, n: usize) -> Result<Vec<FaqHit>, ConciergeError> {
        if self.index.is_empty() || n == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_boxed(text).await?;
        let hits = self.index.search(&embedding, n)?;

        Ok(hits
            .into_iter()
            .map(|hit| FaqHit {
                question: hit.document,
                answer: hit
                    .metadata
                    .get("answer")
                    .and_then(|a| a.as_str())
                    .map(str::to_string),
                score: hit.score,
            })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
