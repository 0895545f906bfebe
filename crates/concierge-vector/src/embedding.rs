//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a sentence-transformer ONNX export (e.g.
//!   all-MiniLM-L6-v2) through ort, tokenizing with HuggingFace tokenizers.
//!   It backs both the FAQ knowledge base and the embedding similarity
//!   backend of the intent router.
//! - `TermHashEmbedding` hashes content words into a fixed-width count
//!   vector, so cosine similarity tracks word overlap. It is the retrieval
//!   backend when no model is configured.
//! - `MockEmbedding` provides deterministic hash-based vectors for tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex};

use concierge_core::error::ConciergeError;
use ort::session::Session;
use ort::value::TensorRef;
use regex::Regex;
use tokenizers::Tokenizer;
use tracing::info;

/// Dimensionality assumed when the model does not report one.
const DEFAULT_DIMENSIONS: usize = 384;

/// Service for generating text embeddings.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ConciergeError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// can be stored as `Arc<dyn DynEmbeddingService>`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, ConciergeError>> + Send + 'a>,
    >;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, ConciergeError>> + Send + 'a>,
    > {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed embedding service.
///
/// Expects a model directory containing `model.onnx` and `tokenizer.json`.
/// Token embeddings are mean-pooled under the attention mask and
/// L2-normalized, so cosine similarity reduces to a dot product.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

fn embedding_err(context: &str, e: impl std::fmt::Display) -> ConciergeError {
    ConciergeError::Embedding(format!("{}: {}", context, e))
}

impl OnnxEmbeddingService {
    /// Load a sentence-transformer model from the given directory.
    pub fn from_directory(model_dir: &Path) -> Result<Self, ConciergeError> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer file paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self, ConciergeError> {
        if !model_path.exists() {
            return Err(ConciergeError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(ConciergeError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| embedding_err("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| embedding_err("ONNX set threads", e))?
            .commit_from_file(model_path)
            .map_err(|e| embedding_err("ONNX load model", e))?;

        // Output is [batch, seq_len, hidden_dim].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { DEFAULT_DIMENSIONS })
            .unwrap_or(DEFAULT_DIMENSIONS);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| embedding_err("Failed to load tokenizer", e))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, ConciergeError> {
        if text.trim().is_empty() {
            return Err(ConciergeError::Embedding("Cannot embed empty text".to_string()));
        }

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| embedding_err("Tokenization failed", e))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();

        let seq_len = input_ids.len();

        let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| embedding_err("input_ids array", e))?;
        let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| embedding_err("attention_mask array", e))?;
        let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| embedding_err("token_type_ids array", e))?;

        let ids_ref = TensorRef::from_array_view(&ids_array)
            .map_err(|e| embedding_err("TensorRef input_ids", e))?;
        let mask_ref = TensorRef::from_array_view(&mask_array)
            .map_err(|e| embedding_err("TensorRef attention_mask", e))?;
        let type_ref = TensorRef::from_array_view(&type_array)
            .map_err(|e| embedding_err("TensorRef token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| embedding_err("Session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| embedding_err("ONNX inference failed", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| embedding_err("Extract embeddings", e))?;

        let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
            [_, .., last] if *last > 0 => *last as usize,
            dims => {
                return Err(ConciergeError::Embedding(format!(
                    "Unexpected output shape: {:?}",
                    dims
                )))
            }
        };

        let mut pooled = vec![0.0f32; hidden_dim];
        let mut count = 0.0f32;
        for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
            if mask_val > 0 {
                let offset = tok_idx * hidden_dim;
                for (dim, slot) in pooled.iter_mut().enumerate() {
                    *slot += data[offset + dim];
                }
                count += 1.0;
            }
        }
        if count > 0.0 {
            for val in &mut pooled {
                *val /= count;
            }
        }

        normalize(&mut pooled);
        Ok(pooled)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConciergeError> {
        // Inference is CPU-bound.
        let svc = self.clone();
        let text_owned = text.to_string();

        tokio::task::spawn_blocking(move || svc.embed_sync(&text_owned))
            .await
            .map_err(|e| embedding_err("Embedding task panicked", e))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs and distinct inputs are near-orthogonal.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(DEFAULT_DIMENSIONS);
        for i in 0..DEFAULT_DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConciergeError> {
        if text.trim().is_empty() {
            return Err(ConciergeError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }
}

// ---------------------------------------------------------------------------
// TermHashEmbedding
// ---------------------------------------------------------------------------

/// Buckets in a term-hash vector.
const TERM_BUCKETS: usize = 4096;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").expect("valid word regex"));

/// Question scaffolding and function words. FAQ questions share these, so
/// counting them would rank "How do I reset my password?" close to every
/// other "How do I ..." question.
const FILLER_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "any", "are", "be", "can", "could", "do", "does", "for",
    "from", "get", "have", "how", "i", "i'm", "if", "in", "is", "it", "its", "me", "my", "of",
    "on", "or", "our", "please", "should", "so", "the", "there", "to", "us", "was", "we",
    "what", "what's", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

/// Lowercased content words with a plain plural `s` removed.
pub fn content_terms(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|word| !FILLER_WORDS.contains(word))
        .map(|word| {
            let stem = match word.strip_suffix('s') {
                Some(stem) if stem.len() >= 3 && !stem.ends_with('s') => stem,
                _ => word,
            };
            stem.to_string()
        })
        .collect()
}

/// Model-free embedding: content-word counts hashed into a fixed number of
/// buckets and normalized. Text with no content words embeds as the zero
/// vector and matches nothing.
#[derive(Debug, Clone, Default)]
pub struct TermHashEmbedding;

impl TermHashEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn bucket(term: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        term.hash(&mut hasher);
        (hasher.finish() % TERM_BUCKETS as u64) as usize
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; TERM_BUCKETS];
        for term in content_terms(text) {
            vector[Self::bucket(&term)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl EmbeddingService for TermHashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ConciergeError> {
        if text.trim().is_empty() {
            return Err(ConciergeError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        TERM_BUCKETS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[test]
    fn test_content_terms_drop_filler_and_plurals() {
        assert_eq!(
            content_terms("What is the return policy of the products?"),
            vec!["return", "policy", "product"]
        );
        assert_eq!(content_terms("How do I reset my password?"), vec!["reset", "password"]);
        assert!(content_terms("How do I?").is_empty());
    }

    #[tokio::test]
    async fn test_term_hash_tracks_word_overlap() {
        let service = TermHashEmbedding::new();
        let query = service.embed("How do I return a product?").await.unwrap();
        let policy = service
            .embed("What is the return policy of the products?")
            .await
            .unwrap();
        let password = service.embed("How do I reset my password?").await.unwrap();

        assert!(cosine_similarity(&query, &policy) > 0.8);
        assert!(cosine_similarity(&query, &password) < 0.1);
    }

    #[tokio::test]
    async fn test_term_hash_filler_only_is_zero() {
        let service = TermHashEmbedding::new();
        let v = service.embed("How do I?").await.unwrap();
        assert_eq!(v.len(), TERM_BUCKETS);
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(service.embed("  ").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("where is my parcel").await.unwrap();
        assert_eq!(vec.len(), 384);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("return policy").await.unwrap();
        let v2 = service.embed("return policy").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let service = MockEmbedding::new();
        let v = service.embed("payment options").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new();
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_rejects_blank_text() {
        let service = MockEmbedding::new();
        assert!(service.embed("").await.is_err());
        let err = service.embed("   ").await.unwrap_err();
        assert!(matches!(err, ConciergeError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::new());
        assert_eq!(service.dimensions(), 384);
        let v = service.embed_boxed("hello").await.unwrap();
        assert_eq!(v.len(), 384);
    }

    #[test]
    fn test_onnx_missing_model() {
        let err = OnnxEmbeddingService::from_directory(Path::new("/nonexistent")).unwrap_err();
        assert!(err.to_string().contains("ONNX model not found"));
    }
}
