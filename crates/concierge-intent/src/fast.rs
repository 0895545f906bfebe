//! Fast tier: threshold-gated nearest-route classification.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use concierge_core::config::ThresholdConfig;
use concierge_core::types::{ClassificationResult, IntentLabel};

use crate::similarity::{LabelScore, SimilarityBackend};

/// Scores a message against every route and accepts the best label whose
/// score strictly exceeds that label's threshold.
#[derive(Clone)]
pub struct SemanticRouter {
    backend: Arc<dyn SimilarityBackend>,
    thresholds: ThresholdConfig,
}

impl std::fmt::Debug for SemanticRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticRouter")
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

/// Order candidates best first: higher score, then lexicographic label
/// name on exact ties.
fn rank(a: &LabelScore, b: &LabelScore) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.label.as_str().cmp(b.label.as_str()))
}

impl SemanticRouter {
    pub fn new(backend: Arc<dyn SimilarityBackend>, thresholds: ThresholdConfig) -> Self {
        Self {
            backend,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Pick the winning label from raw scores, if any clears its threshold.
    pub fn select(&self, scores: &[LabelScore]) -> Option<IntentLabel> {
        scores
            .iter()
            .filter(|s| !s.score.is_nan() && s.score > self.thresholds.for_label(s.label))
            .min_by(|a, b| rank(a, b))
            .map(|s| s.label)
    }

    /// Classify without context. `None` means no label was confident; a
    /// backend failure is logged and reads as `None`.
    pub async fn classify_fast(&self, text: &str) -> Option<IntentLabel> {
        let start = Instant::now();
        let scores = match self.backend.score(text).await {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "Similarity backend failed; treating as no match");
                return None;
            }
        };

        let label = self.select(&scores);
        debug!(
            label = label.map(|l| l.as_str()).unwrap_or("none"),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Fast classification"
        );
        label
    }

    /// Fast-tier result as a [`ClassificationResult`].
    pub async fn classify(&self, text: &str) -> ClassificationResult {
        match self.classify_fast(text).await {
            Some(label) => ClassificationResult::fast(label),
            None => ClassificationResult::Ambiguous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::IntentError;
    use crate::routes::{Route, RouteSet};
    use crate::similarity::LexicalSimilarity;

    struct FixedScores(Vec<LabelScore>);

    #[async_trait]
    impl SimilarityBackend for FixedScores {
        async fn score(&self, _text: &str) -> Result<Vec<LabelScore>, IntentError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl SimilarityBackend for Broken {
        async fn score(&self, _text: &str) -> Result<Vec<LabelScore>, IntentError> {
            Err(IntentError::Backend("index offline".into()))
        }
    }

    fn score(label: IntentLabel, score: f32) -> LabelScore {
        LabelScore { label, score }
    }

    fn router_with(scores: Vec<LabelScore>) -> SemanticRouter {
        SemanticRouter::new(Arc::new(FixedScores(scores)), ThresholdConfig::default())
    }

    fn default_router() -> SemanticRouter {
        SemanticRouter::new(
            Arc::new(LexicalSimilarity::new(&RouteSet::default_routes())),
            ThresholdConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_hello_is_small_talk() {
        assert_eq!(
            default_router().classify_fast("Hello").await,
            Some(IntentLabel::SmallTalk)
        );
    }

    #[tokio::test]
    async fn test_product_query_without_history() {
        assert_eq!(
            default_router().classify_fast("Show me Nike shoes").await,
            Some(IntentLabel::ProductInquiry)
        );
    }

    #[tokio::test]
    async fn test_faq_query() {
        assert_eq!(
            default_router()
                .classify_fast("How do I return a product?")
                .await,
            Some(IntentLabel::Faq)
        );
    }

    #[tokio::test]
    async fn test_referential_follow_up_is_inconclusive() {
        let router = default_router();
        assert_eq!(router.classify_fast("Which of those is cheapest?").await, None);
        assert_eq!(
            router.classify("Which of those is cheapest?").await,
            ClassificationResult::Ambiguous
        );
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let router = router_with(vec![score(IntentLabel::Faq, 0.25)]);
        assert_eq!(router.classify_fast("x").await, None);

        let router = router_with(vec![score(IntentLabel::Faq, 0.2501)]);
        assert_eq!(router.classify_fast("x").await, Some(IntentLabel::Faq));
    }

    #[tokio::test]
    async fn test_highest_score_wins() {
        let router = router_with(vec![
            score(IntentLabel::SmallTalk, 0.4),
            score(IntentLabel::ProductInquiry, 0.9),
            score(IntentLabel::Faq, 0.6),
        ]);
        assert_eq!(
            router.classify_fast("x").await,
            Some(IntentLabel::ProductInquiry)
        );
    }

    #[tokio::test]
    async fn test_exact_tie_breaks_lexicographically() {
        let router = router_with(vec![
            score(IntentLabel::SmallTalk, 0.8),
            score(IntentLabel::ProductInquiry, 0.8),
            score(IntentLabel::Faq, 0.1),
        ]);
        assert_eq!(
            router.classify_fast("x").await,
            Some(IntentLabel::ProductInquiry)
        );
    }

    #[tokio::test]
    async fn test_tie_with_shared_utterance() {
        let routes = RouteSet::new(vec![
            Route::new(IntentLabel::SmallTalk, ["Thanks for the help"]),
            Route::new(IntentLabel::Faq, ["Thanks for the help"]),
        ]);
        let router = SemanticRouter::new(
            Arc::new(LexicalSimilarity::new(&routes)),
            ThresholdConfig::default(),
        );
        assert_eq!(
            router.classify_fast("thanks for the help").await,
            Some(IntentLabel::Faq)
        );
    }

    #[tokio::test]
    async fn test_per_label_thresholds() {
        let thresholds = ThresholdConfig {
            faq: 0.9,
            ..ThresholdConfig::default()
        };
        let router = SemanticRouter::new(
            Arc::new(FixedScores(vec![
                score(IntentLabel::Faq, 0.8),
                score(IntentLabel::SmallTalk, 0.3),
            ])),
            thresholds,
        );
        assert_eq!(router.classify_fast("x").await, Some(IntentLabel::SmallTalk));
    }

    #[tokio::test]
    async fn test_default_label_never_selected() {
        let router = router_with(vec![score(IntentLabel::Default, 1.0)]);
        assert_eq!(router.classify_fast("x").await, None);
    }

    #[tokio::test]
    async fn test_nan_score_ignored() {
        let router = router_with(vec![
            score(IntentLabel::Faq, f32::NAN),
            score(IntentLabel::SmallTalk, 0.3),
        ]);
        assert_eq!(router.classify_fast("x").await, Some(IntentLabel::SmallTalk));
    }

    #[tokio::test]
    async fn test_backend_failure_is_no_match() {
        let router = SemanticRouter::new(Arc::new(Broken), ThresholdConfig::default());
        assert_eq!(router.classify_fast("Hello").await, None);
    }
}
