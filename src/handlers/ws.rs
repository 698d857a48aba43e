//! WebSocket handler: every connection starts as a guest, control events are applied in
//! arrival order, JSON ping/pong keepalive, stale connections are closed by the hub's sweep.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::realtime::{ConnectionEntry, RealtimeHub};
use crate::AppState;

/// Largest inbound frame accepted.
pub const MAX_MESSAGE_BYTES: usize = 1 << 20;

/// Upgrades the connection to WebSocket and hands it to the realtime hub.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| async move {
            let (entry, rx) = hub.on_connect();
            handle_socket(socket, hub, entry, rx).await;
        })
}

async fn handle_socket(
    mut socket: WebSocket,
    hub: Arc<RealtimeHub>,
    entry: Arc<ConnectionEntry>,
    mut rx: mpsc::Receiver<String>,
) {
    let conn_id = entry.conn_id;
    let reason = loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break "send failed";
                        }
                    }
                    None => break "outbound channel closed",
                }
            }
            _ = entry.close.notified() => break "ping timeout",
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = hub.handle_frame(&entry, text.as_str()).await {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break "send failed";
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    Some(Err(err)) => {
                        tracing::warn!(%conn_id, error = %err, "ws transport error");
                        break "transport error";
                    }
                    _ => {}
                }
            }
        }
    };
    hub.on_disconnect(conn_id, reason);
}
