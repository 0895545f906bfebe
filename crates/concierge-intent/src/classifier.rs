//! Two-tier classification: fast router first, contextual tier when the
//! fast router is not confident.

use std::sync::Arc;

use tracing::{debug, warn};

use concierge_core::types::{ClassificationResult, IntentLabel, Turn};

use crate::fallback::{coerce_label, ContextualClassifier};
use crate::fast::SemanticRouter;

/// Always commits to a label. Backend failures degrade to `default`.
#[derive(Clone)]
pub struct TwoTierClassifier {
    fast: SemanticRouter,
    fallback: Option<Arc<dyn ContextualClassifier>>,
}

impl std::fmt::Debug for TwoTierClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierClassifier")
            .field("fast", &self.fast)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl TwoTierClassifier {
    pub fn new(fast: SemanticRouter, fallback: Arc<dyn ContextualClassifier>) -> Self {
        Self {
            fast,
            fallback: Some(fallback),
        }
    }

    /// Fast tier only; inconclusive messages go straight to `default`.
    pub fn fast_only(fast: SemanticRouter) -> Self {
        Self {
            fast,
            fallback: None,
        }
    }

    /// Contextual decision for a message the fast tier could not place.
    /// Never fails: unusable answers and backend errors become `default`.
    pub async fn classify_fallback(&self, history: &[Turn], text: &str) -> IntentLabel {
        let Some(fallback) = &self.fallback else {
            return IntentLabel::Default;
        };
        match fallback.decide(history, text).await {
            Ok(raw) => coerce_label(&raw).unwrap_or_else(|| {
                warn!(answer = %raw, "Contextual classifier answered outside the label set");
                IntentLabel::Default
            }),
            Err(e) => {
                warn!(error = %e, "Contextual classifier failed; using default");
                IntentLabel::Default
            }
        }
    }

    /// Classify `text` given the prior turns. The result is always
    /// `Confident`.
    pub async fn classify(&self, history: &[Turn], text: &str) -> ClassificationResult {
        match self.fast.classify(text).await {
            confident @ ClassificationResult::Confident { .. } => confident,
            ClassificationResult::Ambiguous => {
                let label = self.classify_fallback(history, text).await;
                debug!(label = %label, history_len = history.len(), "Fallback classification");
                ClassificationResult::fallback(label)
            }
        }
    }
}
