//! In-memory vector index with brute-force cosine similarity search.
//!
//! All operations are O(n) for search, which is fine for knowledge bases of
//! a few thousand FAQ entries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use uuid::Uuid;

use concierge_core::error::ConciergeError;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: Uuid,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
    pub document: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    document: String,
    metadata: Value,
}

/// In-memory vector index. Thread-safe via interior RwLock.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Arc<RwLock<HashMap<Uuid, VectorEntry>>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document vector with its metadata.
    ///
    /// Overwrites any existing entry with the same ID.
    pub fn insert(
        &self,
        id: Uuid,
        embedding: Vec<f32>,
        document: String,
        metadata: Value,
    ) -> Result<(), ConciergeError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ConciergeError::Storage(format!("Lock poisoned: {}", e)))?;
        entries.insert(
            id,
            VectorEntry {
                embedding,
                document,
                metadata,
            },
        );
        Ok(())
    }

    /// Search for the k nearest neighbors to the query vector.
    ///
    /// Results are sorted by descending score; equal scores order by ID so
    /// repeated searches return identical lists.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, ConciergeError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ConciergeError::Storage(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<SearchHit> = entries
            .iter()
            .map(|(id, entry)| SearchHit {
                id: *id,
                score: cosine_similarity(query, &entry.embedding),
                document: entry.document.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), ConciergeError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ConciergeError::Storage(format!("Lock poisoned: {}", e)))?;
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
