use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::realtime::SocketStats;
use crate::AppState;

const NO_STORE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewCountResponse {
    view_count: u64,
}

/// GET /api/views: Initial view count for pages that render before joining `viewCountRoom`.
pub async fn get_view_count(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let view_count = state.hub.view_count().await.map_err(|e| {
        tracing::error!("view count: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to count views")
    })?;
    Ok((
        [(header::CACHE_CONTROL, NO_STORE)],
        Json(ViewCountResponse { view_count }),
    ))
}

/// GET /api/socket/stats: Realtime counters.
pub async fn get_socket_stats(State(state): State<AppState>) -> Json<SocketStats> {
    Json(state.hub.socket_stats())
}

/// GET /metrics: Prometheus exposition.
pub async fn get_metrics(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let body = state.hub.metrics.render().map_err(|e| {
        tracing::error!("render metrics: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render metrics")
    })?;
    Ok((
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    ))
}
