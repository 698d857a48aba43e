mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::{hub_with, RecordingStore};
use lotto_realtime::{router, AppState};

async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_is_ok() {
    let hub = hub_with(Arc::new(RecordingStore::with_online(&[])));
    let (status, body) = get(router(AppState { hub }), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn views_add_online_users_and_guests() {
    let hub = hub_with(Arc::new(RecordingStore::with_online(&["x1", "x2"])));
    let _guest = hub.on_connect();

    let (status, body) = get(router(AppState { hub }), "/api/views").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v, serde_json::json!({"viewCount": 3}));
}

#[tokio::test]
async fn socket_stats_report_counters() {
    let hub = hub_with(Arc::new(RecordingStore::with_online(&[])));
    let (a, _rx_a) = hub.on_connect();
    let _b = hub.on_connect();
    hub.on_disconnect(a.conn_id, "test");
    hub.metrics.record_message();

    let (status, body) = get(router(AppState { hub }), "/api/socket/stats").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(v["performanceMetrics"]["totalConnections"], 2);
    assert_eq!(v["performanceMetrics"]["activeConnections"], 1);
    assert_eq!(v["performanceMetrics"]["totalMessages"], 1);
    assert_eq!(v["connectionStats"]["peakConnections"], 2);
    assert_eq!(v["connectionStats"]["totalDisconnections"], 1);
    assert_eq!(v["guestCount"], 1);
    assert_eq!(v["onlineUsersCount"], 0);
    assert!(v["uptime"].is_u64());
}

#[tokio::test]
async fn metrics_are_exposed_in_text_format() {
    let hub = hub_with(Arc::new(RecordingStore::with_online(&[])));
    let _conn = hub.on_connect();

    let (status, body) = get(router(AppState { hub }), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("realtime_active_connections 1"));
}
