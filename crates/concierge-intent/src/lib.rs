//! Concierge Intent crate - two-tier intent classification.
//!
//! The fast tier scores a message against labeled reference utterances and
//! accepts the best label above its threshold. When nothing clears a
//! threshold the contextual tier decides using the conversation history.

pub mod classifier;
pub mod error;
pub mod fallback;
pub mod fast;
pub mod routes;
pub mod similarity;

pub use classifier::TwoTierClassifier;
pub use error::IntentError;
pub use fallback::{
    coerce_label, ContextualClassifier, LlmContextualClassifier, ReferentialContextClassifier,
};
pub use fast::SemanticRouter;
pub use routes::{Route, RouteSet};
pub use similarity::{EmbeddingSimilarity, LabelScore, LexicalSimilarity, SimilarityBackend};
