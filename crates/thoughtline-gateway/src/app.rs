use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use thoughtline_core::ThoughtlineConfig;
use tower_http::cors::{Any, CorsLayer};

use crate::policy::UpstreamPolicy;

/// Shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ThoughtlineConfig,
    pub policy: UpstreamPolicy,
    /// Shared upstream HTTP client (connection pool).
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: ThoughtlineConfig, client: reqwest::Client) -> Self {
        let policy = UpstreamPolicy::from_config(&config.proxy);
        Self {
            config,
            policy,
            client,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);
    let body_limit = state.config.proxy.max_body_bytes;

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/api/proxy", post(crate::http::proxy::proxy_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
