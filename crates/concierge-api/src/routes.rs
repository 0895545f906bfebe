//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, body limits
//! and the rate limiter.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use concierge_core::config::ConciergeConfig;
use concierge_core::error::ConciergeError;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    let public_routes = Router::new()
        .route("/", get(handlers::landing))
        .route("/health", get(handlers::health));

    let mut api_routes = Router::new()
        .route(
            "/api/v1/chat",
            post(handlers::chat).layer(DefaultBodyLimit::max(64 * 1024)),
        )
        .route(
            "/api/v1/conversations/{id}/history",
            get(handlers::conversation_history),
        );

    let rate = state.config.server.rate_limit_per_sec;
    if rate > 0 {
        api_routes = api_routes
            .layer(axum::middleware::from_fn(rate_limit_middleware))
            .layer(axum::Extension(RateLimiter::new(rate)));
    }

    public_routes
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind the configured address and serve until the listener fails.
pub async fn start_server(config: &ConciergeConfig, state: AppState) -> Result<(), ConciergeError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ConciergeError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| ConciergeError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
