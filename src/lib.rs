pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod realtime;
pub mod schema;
pub mod serde_id;
pub mod store;

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::stats::health))
        .route("/ws", get(handlers::ws::ws_handler))
        .route("/api/views", get(handlers::stats::get_view_count))
        .route("/api/socket/stats", get(handlers::stats::get_socket_stats))
        .route("/metrics", get(handlers::stats::get_metrics))
        .with_state(state)
}

/// Request tracing, `x-request-id` tagging and CORS for the given frontend origin.
pub fn with_http_layers(router: Router, frontend_url: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true);
    let cors = match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(frontend_url, "invalid FRONTEND_URL, cross-origin requests disabled");
            cors
        }
    };
    router
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
