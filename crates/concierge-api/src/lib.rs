//! Concierge API crate - axum HTTP transport for the dialogue router.
//!
//! Exposes the chat endpoint, conversation history, a health check and the
//! landing page, with CORS, request tracing and rate limiting.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
