//! Integration tests for the Concierge API.
//!
//! Each test builds its own router over in-memory stores, a lexical
//! classifier and scripted completion clients.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use tower::ServiceExt;

use concierge_api::create_router;
use concierge_api::error::ErrorBody;
use concierge_api::handlers::{ChatResponse, HealthResponse, HistoryResponse};
use concierge_api::state::AppState;
use concierge_chat::{
    DefaultHandler, DialogueRouter, FaqHandler, HandlerRegistry, ProductHandler, RouterSettings,
    SmallTalkHandler,
};
use concierge_core::config::{ConciergeConfig, ThresholdConfig};
use concierge_core::error::ConciergeError;
use concierge_core::types::{ClassificationSource, IntentLabel, NewTurn, Role, Turn};
use concierge_intent::{
    LexicalSimilarity, ReferentialContextClassifier, RouteSet, SemanticRouter, TwoTierClassifier,
};
use concierge_llm::MockCompletionClient;
use concierge_storage::{
    ConversationStore, Database, InMemoryConversationStore, ProductCatalog, RetentionPolicy,
};
use concierge_vector::{FaqEntry, KnowledgeBase, TermHashEmbedding};

// =============================================================================
// Helpers
// =============================================================================

const SMALL_TALK_REPLY: &str = "Hi! Anything I can help you find today?";

/// Store whose writes always fail.
struct LockedStore;

#[async_trait]
impl ConversationStore for LockedStore {
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

async fn make_state_with(config: ConciergeConfig, store: Arc<dyn ConversationStore>) -> AppState {
    let fast = SemanticRouter::new(
        Arc::new(LexicalSimilarity::new(&RouteSet::default_routes())),
        ThresholdConfig::default(),
    );
    let classifier =
        TwoTierClassifier::new(fast.clone(), Arc::new(ReferentialContextClassifier::new(fast)));

    let knowledge = KnowledgeBase::new(Arc::new(TermHashEmbedding::new()));
    knowledge
        .ingest(&[FaqEntry {
            question: "What is your return policy?".into(),
            answer: Some("Items can be returned within 30 days.".into()),
        }])
        .await
        .unwrap();

    let catalog = ProductCatalog::new(Arc::new(Database::in_memory().unwrap()), 50);
    let llm = Arc::new(MockCompletionClient::fixed(SMALL_TALK_REPLY));

    let handlers = HandlerRegistry::new(
        Arc::new(FaqHandler::new(Arc::new(knowledge), llm.clone(), "faq", 5, 16)),
        Arc::new(ProductHandler::new(catalog, llm.clone(), "sql", 10, 10)),
        Arc::new(SmallTalkHandler::new(llm, "chat", 10)),
        Arc::new(DefaultHandler),
    );
    let router = DialogueRouter::new(
        store,
        classifier,
        handlers,
        RouterSettings::from_config(&config.chat),
    );
    AppState::new(config, router)
}

async fn make_app() -> axum::Router {
    let store = Arc::new(InMemoryConversationStore::new(RetentionPolicy::unbounded()));
    create_router(make_state_with(ConciergeConfig::default(), store).await)
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn chat(app: &axum::Router, json: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(post_json("/api/v1/chat", json))
        .await
        .unwrap();
    let status = resp.status();
    (status, body_bytes(resp).await)
}

// =============================================================================
// Public endpoints
// =============================================================================

#[tokio::test]
async fn test_landing_page() {
    let app = make_app().await;
    let resp = app.oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    let body = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(body.contains("/api/v1/chat"));
    assert!(body.contains("<h1>E-Commerce Chatbot</h1>"));
}

#[tokio::test]
async fn test_health_happy_path() {
    let app = make_app().await;
    chat(&app, r#"{"question": "Hello", "conversation_id": "h1"}"#).await;

    let resp = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.conversations, 1);
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn test_chat_small_talk() {
    let app = make_app().await;
    let (status, body) = chat(&app, r#"{"question": "Hello", "conversation_id": "c1"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let reply: ChatResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.answer, SMALL_TALK_REPLY);
    assert_eq!(reply.conversation_id, "c1");
    assert_eq!(reply.intent, IntentLabel::SmallTalk);
    assert_eq!(reply.source, ClassificationSource::Fast);
}

#[tokio::test]
async fn test_chat_generates_conversation_id() {
    let app = make_app().await;
    let (status, body) = chat(&app, r#"{"question": "Hello"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let reply: ChatResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.conversation_id.len(), 36);

    let (_, body) = chat(
        &app,
        &format!(r#"{{"question": "thanks", "conversation_id": "{}"}}"#, reply.conversation_id),
    )
    .await;
    let second: ChatResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(second.conversation_id, reply.conversation_id);
}

#[tokio::test]
async fn test_chat_faq_uses_stored_answer() {
    let app = make_app().await;
    let (status, body) =
        chat(&app, r#"{"question": "What is your return policy?", "conversation_id": "f1"}"#)
            .await;
    assert_eq!(status, StatusCode::OK);

    let reply: ChatResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.intent, IntentLabel::Faq);
    assert_eq!(reply.answer, "Items can be returned within 30 days.");
}

#[tokio::test]
async fn test_chat_unknown_topic_gets_default_reply() {
    let app = make_app().await;
    let (status, body) = chat(&app, r#"{"question": "qwzx plorb"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let reply: ChatResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.intent, IntentLabel::Default);
    assert_eq!(reply.answer, "Sorry, I cannot handle this type of question yet.");
}

#[tokio::test]
async fn test_chat_empty_question_is_bad_request() {
    let app = make_app().await;
    let (status, body) = chat(&app, r#"{"question": "   "}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "bad_request");
    assert_eq!(error.retryable, None);
}

#[tokio::test]
async fn test_chat_oversized_question_is_bad_request() {
    let mut config = ConciergeConfig::default();
    config.chat.max_message_chars = 5;
    let store = Arc::new(InMemoryConversationStore::new(RetentionPolicy::unbounded()));
    let app = create_router(make_state_with(config, store).await);

    let (status, _) = chat(&app, r#"{"question": "Hello there"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_missing_question_is_rejected() {
    let app = make_app().await;
    let (status, _) = chat(&app, r#"{"conversation_id": "c1"}"#).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_chat_store_failure_is_retryable() {
    let app = create_router(make_state_with(ConciergeConfig::default(), Arc::new(LockedStore)).await);
    let (status, body) = chat(&app, r#"{"question": "Hello"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let error: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "service_unavailable");
    assert_eq!(error.retryable, Some(true));
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_history_after_chat() {
    let app = make_app().await;
    chat(&app, r#"{"question": "Hello", "conversation_id": "c9"}"#).await;

    let resp = app
        .oneshot(get("/api/v1/conversations/c9/history"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let history: HistoryResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(history.conversation_id, "c9");
    assert_eq!(history.turns.len(), 2);
    assert_eq!(history.turns[0].role, Role::User);
    assert_eq!(history.turns[0].content, "Hello");
    assert_eq!(history.turns[1].role, Role::Assistant);
    assert_eq!(history.turns[1].content, SMALL_TALK_REPLY);
}

#[tokio::test]
async fn test_history_unknown_conversation_is_empty() {
    let app = make_app().await;
    let resp = app
        .oneshot(get("/api/v1/conversations/nobody/history"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let history: HistoryResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(history.turns.is_empty());
}

// =============================================================================
// Middleware
// =============================================================================

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let app = make_app().await;
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/chat")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap()),
        Some("http://localhost:5173")
    );
}

#[tokio::test]
async fn test_cors_rejects_other_origin() {
    let app = make_app().await;
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/chat")
        .header("origin", "http://evil.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert!(resp.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let mut config = ConciergeConfig::default();
    config.server.rate_limit_per_sec = 1;
    let store = Arc::new(InMemoryConversationStore::new(RetentionPolicy::unbounded()));
    let app = create_router(make_state_with(config, store).await);

    let mut limited = 0;
    for _ in 0..10 {
        let resp = app
            .clone()
            .oneshot(get("/api/v1/conversations/c1/history"))
            .await
            .unwrap();
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert!(limited >= 8);
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let mut config = ConciergeConfig::default();
    config.server.rate_limit_per_sec = 1;
    let store = Arc::new(InMemoryConversationStore::new(RetentionPolicy::unbounded()));
    let app = create_router(make_state_with(config, store).await);

    for _ in 0..5 {
        let resp = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
