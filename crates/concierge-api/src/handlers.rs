//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its input via axum extractors, calls the dialogue
//! router held in [`AppState`], and returns JSON.

use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use concierge_core::types::{ClassificationSource, IntentLabel, Turn};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

/// Body of POST /api/v1/chat.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    /// Omitted or blank starts a new conversation.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub conversation_id: String,
    pub intent: IntentLabel,
    pub source: ClassificationSource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub conversations: u64,
}

// =============================================================================
// Handlers
// =============================================================================

const LANDING_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{{app_name}}</title>
  <style>
    body { font-family: system-ui, sans-serif; max-width: 40rem; margin: 4rem auto; color: #222; }
    code { background: #f3f3f3; padding: 0.1rem 0.3rem; border-radius: 3px; }
  </style>
</head>
<body>
  <h1>{{app_name}}</h1>
  <p>Shopping assistant API. Send a question to <code>POST /api/v1/chat</code>
  with a JSON body such as <code>{"question": "Show me Nike shoes"}</code>.</p>
  <p>Service status is available at <code>GET /health</code>.</p>
</body>
</html>
"#;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// GET / - landing page titled with the configured application name.
pub async fn landing(State(state): State<AppState>) -> impl IntoResponse {
    Html(LANDING_HTML.replace("{{app_name}}", &escape_html(&state.config.general.app_name)))
}

/// GET /health - liveness plus a few counters.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let conversations = state.router.conversation_count().await.unwrap_or(0) as u64;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        conversations,
    }))
}

/// POST /api/v1/chat - route one message and return the reply.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let conversation_id = match request.conversation_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => {
            let id = Uuid::new_v4().to_string();
            info!(conversation_id = %id, "Starting new conversation");
            id
        }
    };

    let outcome = state.router.route(&conversation_id, &request.question).await?;

    Ok(Json(ChatResponse {
        answer: outcome.reply,
        conversation_id,
        intent: outcome.label,
        source: outcome.source,
    }))
}

/// GET /api/v1/conversations/{id}/history - turns in order. Unknown ids
/// yield an empty list.
pub async fn conversation_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns = state.router.history(&conversation_id).await?;
    Ok(Json(HistoryResponse {
        conversation_id,
        turns,
    }))
}
