//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use concierge_chat::DialogueRouter;
use concierge_core::config::ConciergeConfig;

/// Shared application state, passed to handlers via axum's `State`
/// extractor. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed after startup.
    pub config: Arc<ConciergeConfig>,
    /// Dialogue router serving every conversation.
    pub router: DialogueRouter,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ConciergeConfig, router: DialogueRouter) -> Self {
        Self {
            config: Arc::new(config),
            router,
            start_time: Instant::now(),
        }
    }
}
