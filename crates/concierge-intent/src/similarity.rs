//! Similarity backends for the fast tier.
//!
//! A backend scores a message against every route and reports, per label,
//! the score of the best-matching reference utterance.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use concierge_core::types::IntentLabel;
use concierge_vector::{cosine_similarity, DynEmbeddingService};

use crate::error::IntentError;
use crate::routes::RouteSet;

/// Best reference score for one label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelScore {
    pub label: IntentLabel,
    pub score: f32,
}

#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    /// One entry per routed label. Order is unspecified.
    async fn score(&self, text: &str) -> Result<Vec<LabelScore>, IntentError>;
}

fn best_per_label<T>(
    references: &[(IntentLabel, Vec<T>)],
    mut similarity: impl FnMut(&T) -> f32,
) -> Vec<LabelScore> {
    references
        .iter()
        .map(|(label, refs)| LabelScore {
            label: *label,
            score: refs
                .iter()
                .map(&mut similarity)
                .fold(0.0f32, f32::max),
        })
        .collect()
}

// =============================================================================
// Lexical
// =============================================================================

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").expect("valid token regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "any", "are", "be", "for", "from", "i", "in", "is", "it", "its", "me", "my",
    "of", "on", "or", "some", "that", "the", "them", "there", "these", "this", "those", "to",
    "was", "which", "with",
];

type TermVector = HashMap<String, f32>;

fn term_vector(text: &str) -> TermVector {
    let lowered = text.to_lowercase();
    let mut terms = TermVector::new();
    for token in TOKEN.find_iter(&lowered) {
        let token = token.as_str();
        if !STOPWORDS.contains(&token) {
            *terms.entry(token.to_string()).or_insert(0.0) += 1.0;
        }
    }
    terms
}

fn term_cosine(a: &TermVector, b: &TermVector) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f32 = a
        .iter()
        .filter_map(|(term, wa)| b.get(term).map(|wb| wa * wb))
        .sum();
    let norm_a = a.values().map(|w| w * w).sum::<f32>().sqrt();
    let norm_b = b.values().map(|w| w * w).sum::<f32>().sqrt();
    dot / (norm_a * norm_b)
}

/// Model-free backend: cosine similarity over lowercase word counts with
/// function words removed. Deterministic and cheap; used when no embedding
/// model is configured.
#[derive(Debug, Clone)]
pub struct LexicalSimilarity {
    references: Vec<(IntentLabel, Vec<TermVector>)>,
}

impl LexicalSimilarity {
    pub fn new(routes: &RouteSet) -> Self {
        Self {
            references: routes
                .routes()
                .iter()
                .map(|route| {
                    (
                        route.label,
                        route.utterances.iter().map(|u| term_vector(u)).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Synchronous scoring, also used by benchmarks.
    pub fn score_sync(&self, text: &str) -> Vec<LabelScore> {
        let query = term_vector(text);
        best_per_label(&self.references, |reference| term_cosine(&query, reference))
    }
}

#[async_trait]
impl SimilarityBackend for LexicalSimilarity {
    async fn score(&self, text: &str) -> Result<Vec<LabelScore>, IntentError> {
        Ok(self.score_sync(text))
    }
}

// =============================================================================
// Embedding
// =============================================================================

/// Sentence-embedding backend.
///
/// Reference utterances are embedded once by [`EmbeddingSimilarity::initialize`];
/// scoring before that fails with [`IntentError::NotInitialized`].
pub struct EmbeddingSimilarity {
    embedder: Arc<dyn DynEmbeddingService>,
    references: RwLock<Option<Vec<(IntentLabel, Vec<Vec<f32>>)>>>,
}

impl std::fmt::Debug for EmbeddingSimilarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingSimilarity")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl EmbeddingSimilarity {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>) -> Self {
        Self {
            embedder,
            references: RwLock::new(None),
        }
    }

    /// Embed every reference utterance. Replaces any previous references.
    pub async fn initialize(&self, routes: &RouteSet) -> Result<(), IntentError> {
        let mut embedded = Vec::with_capacity(routes.routes().len());
        for route in routes.routes() {
            let mut vectors = Vec::with_capacity(route.utterances.len());
            for utterance in &route.utterances {
                vectors.push(self.embedder.embed_boxed(utterance).await?);
            }
            embedded.push((route.label, vectors));
        }

        let mut references = self
            .references
            .write()
            .map_err(|e| IntentError::Backend(format!("Lock poisoned: {}", e)))?;
        *references = Some(embedded);
        info!(
            utterances = routes.utterance_count(),
            "Embedded intent reference utterances"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.references
            .read()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl SimilarityBackend for EmbeddingSimilarity {
    async fn score(&self, text: &str) -> Result<Vec<LabelScore>, IntentError> {
        if !self.is_initialized() {
            return Err(IntentError::NotInitialized);
        }
        let query = self.embedder.embed_boxed(text).await?;

        let references = self
            .references
            .read()
            .map_err(|e| IntentError::Backend(format!("Lock poisoned: {}", e)))?;
        let references = references.as_ref().ok_or(IntentError::NotInitialized)?;
        Ok(best_per_label(references, |reference| {
            cosine_similarity(&query, reference) as f32
        }))
    }
}
