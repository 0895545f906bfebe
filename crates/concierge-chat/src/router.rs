//! Dialogue router: load history, classify, dispatch, record the exchange.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use concierge_core::config::ChatConfig;
use concierge_core::error::ConciergeError;
use concierge_core::types::{
    ClassificationResult, ClassificationSource, IntentLabel, NewTurn, RoutedRequest, Turn,
};
use concierge_intent::TwoTierClassifier;
use concierge_storage::ConversationStore;

use crate::error::ChatError;
use crate::handler::HandlerRegistry;

/// Input limits and the failure reply.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub max_message_chars: usize,
    pub apology: String,
}

impl RouterSettings {
    pub fn from_config(config: &ChatConfig) -> Self {
        Self {
            max_message_chars: config.max_message_chars,
            apology: config.apology.clone(),
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from_config(&ChatConfig::default())
    }
}

/// Result of routing one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteOutcome {
    pub reply: String,
    pub label: IntentLabel,
    pub source: ClassificationSource,
}

/// Routes messages for any number of conversations. Cheap to clone.
#[derive(Clone)]
pub struct DialogueRouter {
    store: Arc<dyn ConversationStore>,
    classifier: TwoTierClassifier,
    handlers: HandlerRegistry,
    settings: RouterSettings,
}

impl std::fmt::Debug for DialogueRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueRouter")
            .field("classifier", &self.classifier)
            .field("handlers", &self.handlers)
            .field("settings", &self.settings)
            .finish()
    }
}

fn store_unavailable(err: ConciergeError) -> ChatError {
    ChatError::StoreUnavailable(err.to_string())
}

impl DialogueRouter {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        classifier: TwoTierClassifier,
        handlers: HandlerRegistry,
        settings: RouterSettings,
    ) -> Self {
        Self {
            store,
            classifier,
            handlers,
            settings,
        }
    }

    /// Answer `text` within conversation `conversation_id`.
    ///
    /// Handler failures become the apology reply. The user turn and the
    /// reply are written together after the reply exists; if that write
    /// fails the call returns a retryable error and nothing is recorded.
    pub async fn route(&self, conversation_id: &str, text: &str) -> Result<RouteOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.settings.max_message_chars {
            return Err(ChatError::MessageTooLong(self.settings.max_message_chars));
        }

        let started = Instant::now();
        let history = self
            .store
            .get_history(conversation_id)
            .await
            .map_err(store_unavailable)?;

        let (label, source) = match self.classifier.classify(&history, text).await {
            ClassificationResult::Confident { label, source } => (label, source),
            ClassificationResult::Ambiguous => (IntentLabel::Default, ClassificationSource::Fallback),
        };

        let request = RoutedRequest::new(conversation_id, text, history);
        let handler = self.handlers.get(label);
        let reply = match handler.handle(&request).await {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                warn!(conversation_id, label = %label, "Handler returned an empty reply");
                self.settings.apology.clone()
            }
            Err(e) => {
                warn!(conversation_id, label = %label, error = %e, "Handler failed");
                self.settings.apology.clone()
            }
        };

        self.store
            .append_exchange(conversation_id, NewTurn::user(text), NewTurn::assistant(reply.clone()))
            .await
            .map_err(|e| {
                warn!(conversation_id, error = %e, "Failed to record exchange");
                store_unavailable(e)
            })?;

        info!(
            conversation_id,
            label = %label,
            source = %source,
            history_len = request.history.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Routed message"
        );

        Ok(RouteOutcome {
            reply,
            label,
            source,
        })
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Turn>, ChatError> {
        self.store
            .get_history(conversation_id)
            .await
            .map_err(store_unavailable)
    }

    pub async fn conversation_count(&self) -> Result<usize, ChatError> {
        self.store
            .conversation_count()
            .await
            .map_err(store_unavailable)
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use concierge_core::config::ThresholdConfig;
    use concierge_core::types::Role;
    use concierge_intent::{
        ContextualClassifier, IntentError, LabelScore, LexicalSimilarity,
        ReferentialContextClassifier, RouteSet, SemanticRouter, SimilarityBackend,
    };
    use concierge_storage::{InMemoryConversationStore, RetentionPolicy};

    use crate::error::HandlerError;
    use crate::handler::default::{DefaultHandler, DEFAULT_REPLY};
    use crate::handler::IntentHandler;

    /// Replies "<label>: <text>" after an optional delay.
    struct Echo {
        label: IntentLabel,
        delay: Duration,
    }

    #[async_trait]
    impl IntentHandler for Echo {
        fn label(&self) -> IntentLabel {
            self.label
        }

        async fn handle(&self, request: &RoutedRequest) -> Result<String, HandlerError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(format!("{}: {} [{}]", self.label, request.raw_text, request.history.len()))
        }
    }

    struct Broken;

    #[async_trait]
    impl IntentHandler for Broken {
        fn label(&self) -> IntentLabel {
            IntentLabel::ProductInquiry
        }

        async fn handle(&self, _request: &RoutedRequest) -> Result<String, HandlerError> {
            Err(HandlerError::Catalog("relation does not exist".into()))
        }
    }

    struct DownBackend;

    #[async_trait]
    impl SimilarityBackend for DownBackend {
        async fn score(&self, _text: &str) -> Result<Vec<LabelScore>, IntentError> {
            Err(IntentError::Backend("embedding service down".into()))
        }
    }

    struct DownClassifier;

    #[async_trait]
    impl ContextualClassifier for DownClassifier {
        async fn decide(&self, _history: &[Turn], _text: &str) -> Result<String, IntentError> {
            Err(IntentError::Backend("completion service down".into()))
        }
    }

    /// Reads succeed, writes fail.
    struct ReadOnlyStore;

    #[async_trait]
    impl ConversationStore for ReadOnlyStore {
        async fn get_history(&self, _id: &str) -> Result<Vec<Turn>, ConciergeError> {
            Ok(Vec::new())
        }

        async fn append(&self, _id: &str, _turn: NewTurn) -> Result<Turn, ConciergeError> {
            Err(ConciergeError::Storage("database is locked".into()))
        }

        async fn append_exchange(
            &self,
            _id: &str,
            _user: NewTurn,
            _assistant: NewTurn,
        ) -> Result<(), ConciergeError> {
            Err(ConciergeError::Storage("database is locked".into()))
        }

        async fn conversation_count(&self) -> Result<usize, ConciergeError> {
            Ok(0)
        }

        async fn sweep(&self, _now: DateTime<Utc>) -> Result<usize, ConciergeError> {
            Ok(0)
        }
    }

    fn lexical_router() -> SemanticRouter {
        SemanticRouter::new(
            Arc::new(LexicalSimilarity::new(&RouteSet::default_routes())),
            ThresholdConfig::default(),
        )
    }

    fn classifier() -> TwoTierClassifier {
        let fast = lexical_router();
        TwoTierClassifier::new(fast.clone(), Arc::new(ReferentialContextClassifier::new(fast)))
    }

    fn echo(label: IntentLabel, delay: Duration) -> Arc<dyn IntentHandler> {
        Arc::new(Echo { label, delay })
    }

    fn echo_handlers(delay: Duration) -> HandlerRegistry {
        HandlerRegistry::new(
            echo(IntentLabel::Faq, delay),
            echo(IntentLabel::ProductInquiry, delay),
            echo(IntentLabel::SmallTalk, delay),
            Arc::new(DefaultHandler),
        )
    }

    fn router_with(store: Arc<dyn ConversationStore>, handlers: HandlerRegistry) -> DialogueRouter {
        DialogueRouter::new(store, classifier(), handlers, RouterSettings::default())
    }

    fn memory_store() -> Arc<dyn ConversationStore> {
        Arc::new(InMemoryConversationStore::new(RetentionPolicy::unbounded()))
    }

    #[tokio::test]
    async fn test_greeting_goes_to_small_talk() {
        let router = router_with(memory_store(), echo_handlers(Duration::ZERO));

        let outcome = router.route("c1", "Hello").await.unwrap();
        assert_eq!(outcome.label, IntentLabel::SmallTalk);
        assert_eq!(outcome.source, ClassificationSource::Fast);
        assert_eq!(outcome.reply, "small_talk: Hello [0]");

        let history = router.history("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, outcome.reply);
    }

    #[tokio::test]
    async fn test_follow_up_resolved_from_history() {
        let router = router_with(memory_store(), echo_handlers(Duration::ZERO));

        let first = router.route("c1", "Show me Nike shoes").await.unwrap();
        assert_eq!(first.label, IntentLabel::ProductInquiry);
        assert_eq!(first.reply, "product_inquiry: Show me Nike shoes [0]");

        let second = router.route("c1", "Which of those is cheapest?").await.unwrap();
        assert_eq!(second.label, IntentLabel::ProductInquiry);
        assert_eq!(second.source, ClassificationSource::Fallback);
        assert_eq!(second.reply, "product_inquiry: Which of those is cheapest? [2]");
        assert_eq!(router.history("c1").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unrouteable_message_gets_default_reply() {
        let router = router_with(memory_store(), echo_handlers(Duration::ZERO));
        let outcome = router.route("c1", "qwzx plorb").await.unwrap();
        assert_eq!(outcome.label, IntentLabel::Default);
        assert_eq!(outcome.reply, DEFAULT_REPLY);
    }

    #[tokio::test]
    async fn test_classifier_outage_still_replies() {
        let classifier = TwoTierClassifier::new(
            SemanticRouter::new(Arc::new(DownBackend), ThresholdConfig::default()),
            Arc::new(DownClassifier),
        );
        let router = DialogueRouter::new(
            memory_store(),
            classifier,
            echo_handlers(Duration::ZERO),
            RouterSettings::default(),
        );

        let outcome = router.route("c1", "Hello").await.unwrap();
        assert_eq!(outcome.label, IntentLabel::Default);
        assert!(!outcome.reply.is_empty());
        assert_eq!(router.history("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_handler_failure_becomes_apology() {
        let handlers = HandlerRegistry::new(
            echo(IntentLabel::Faq, Duration::ZERO),
            Arc::new(Broken),
            echo(IntentLabel::SmallTalk, Duration::ZERO),
            Arc::new(DefaultHandler),
        );
        let router = router_with(memory_store(), handlers);

        let outcome = router.route("c1", "Show me Nike shoes").await.unwrap();
        assert_eq!(outcome.reply, RouterSettings::default().apology);
        let history = router.history("c1").await.unwrap();
        assert_eq!(history[1].content, outcome.reply);
    }

    #[tokio::test]
    async fn test_rejects_bad_input_before_classifying() {
        let store = memory_store();
        let router = DialogueRouter::new(
            store.clone(),
            classifier(),
            echo_handlers(Duration::ZERO),
            RouterSettings {
                max_message_chars: 10,
                apology: "sorry".into(),
            },
        );

        assert!(matches!(router.route("c1", "   ").await, Err(ChatError::EmptyMessage)));
        assert!(matches!(
            router.route("c1", "ééééééééééé").await,
            Err(ChatError::MessageTooLong(10))
        ));
        assert!(router.route("c1", "éééééééééé").await.is_ok());
        assert_eq!(store.get_history("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_conversation_id_is_valid() {
        let router = router_with(memory_store(), echo_handlers(Duration::ZERO));
        router.route("", "Hello").await.unwrap();
        assert_eq!(router.history("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_store_write_failure_is_retryable() {
        let router = router_with(Arc::new(ReadOnlyStore), echo_handlers(Duration::ZERO));
        let err = router.route("c1", "Hello").await.unwrap_err();
        assert!(matches!(err, ChatError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_distinct_conversations_run_concurrently() {
        let delay = Duration::from_millis(200);
        let router = router_with(memory_store(), echo_handlers(delay));

        let started = Instant::now();
        let (a, b) = tokio::join!(router.route("a", "Hello"), router.route("b", "Hello"));
        a.unwrap();
        b.unwrap();
        assert!(started.elapsed() < delay * 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_conversation_pairs_never_interleave() {
        let router = router_with(memory_store(), echo_handlers(Duration::from_millis(5)));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move { router.route("shared", &format!("Hello {}", i)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let history = router.history("shared").await.unwrap();
        assert_eq!(history.len(), 16);
        for (i, pair) in history.chunks(2).enumerate() {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert!(pair[1].content.contains(&pair[0].content));
            assert_eq!(pair[0].sequence, 2 * i as u64);
            assert_eq!(pair[1].sequence, 2 * i as u64 + 1);
        }
    }

    #[tokio::test]
    async fn test_conversation_count() {
        let router = router_with(memory_store(), echo_handlers(Duration::ZERO));
        router.route("a", "Hello").await.unwrap();
        router.route("b", "Hello").await.unwrap();
        router.route("a", "Hello again").await.unwrap();
        assert_eq!(router.conversation_count().await.unwrap(), 2);
    }
}
