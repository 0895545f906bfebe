//! Concierge Vector crate - embedding services, in-memory vector index, and
//! the FAQ knowledge base.

pub mod embedding;
pub mod index;
pub mod knowledge;

pub use embedding::{
    content_terms, DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService,
    TermHashEmbedding,
};
pub use index::{cosine_similarity, SearchHit, VectorIndex};
pub use knowledge::{load_faq_file, FaqEntry, FaqHit, KnowledgeBase};
