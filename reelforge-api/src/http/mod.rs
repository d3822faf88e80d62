// HTTP/JSON API module

pub mod artifact;
pub mod error;
pub mod generate;
pub mod health;
pub mod heartbeat;
pub mod middleware;
pub mod progress;
pub mod rate_limit;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use reelforge_core::{
    media::Compositor,
    service::{JobTracker, LifecycleManager, RateLimiter},
    Config,
};

pub use error::{AppError, AppResult};

/// Application state shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limiter: RateLimiter,
    pub jobs: JobTracker,
    pub lifecycle: LifecycleManager,
    pub compositor: Compositor,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let max_body = state.config.server.max_body_bytes;
    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .route("/generate", post(generate::generate))
        .route("/progress/{job_id}", get(progress::get_progress))
        .route("/artifact/{artifact_id}", get(artifact::serve_artifact))
        .route("/heartbeat", post(heartbeat::heartbeat))
        .route("/rate-limit-status", get(rate_limit::rate_limit_status))
        .merge(health::create_health_router())
        .layer(DefaultBodyLimit::max(max_body))
        .layer(axum::middleware::from_fn(middleware::security_headers_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Apply state to all routes (must be last)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
