//! Realtime presence and broadcast layer.
//!
//! [`RealtimeHub`] owns every piece of process-wide realtime state: live connections and the
//! guest counter ([`registry`]), room membership ([`rooms`]), online status ([`presence`]),
//! producer broadcasts ([`broadcast`]) and counters ([`metrics`]). It is built once at startup
//! and shared with the HTTP layer through `AppState`.

pub mod broadcast;
pub mod events;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod tasks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::auth::TokenVerifier;
use crate::error::RealtimeError;
use crate::store::IdentityStore;

pub use broadcast::{BroadcastRequest, BroadcastTarget, Delivery};
pub use events::ClientEvent;
pub use metrics::{MetricsCollector, MetricsSnapshot, SocketStats};
pub use presence::PresenceService;
pub use registry::{ConnectionEntry, ConnectionId, ConnectionRegistry};
pub use rooms::{RoomManager, RoomName};
pub use tasks::TaskSupervisor;

pub struct RealtimeHub {
    pub registry: ConnectionRegistry,
    pub rooms: RoomManager,
    pub presence: PresenceService,
    pub metrics: MetricsCollector,
    pub tasks: TaskSupervisor,
    initialized: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl RealtimeHub {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Arc<Self>, RealtimeError> {
        let metrics = MetricsCollector::new()?;
        let tasks = TaskSupervisor::new(metrics.background_failures());
        Ok(Arc::new(Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomManager::new(),
            presence: PresenceService::new(store, verifier),
            metrics,
            tasks,
            initialized: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }))
    }

    /// Open the hub for producer broadcasts and start the health-check observer.
    /// A second call only logs.
    pub fn initialize(self: &Arc<Self>) {
        self.initialize_with(metrics::HEALTH_CHECK_INTERVAL);
    }

    pub fn initialize_with(self: &Arc<Self>, health_interval: Duration) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            tracing::warn!("realtime hub already initialized");
            return;
        }
        let health = metrics::spawn_health_check(Arc::clone(self), health_interval);
        self.track(health);
        tracing::info!("realtime hub initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Periodically ask connections silent for longer than `timeout` to close.
    pub fn spawn_stale_sweep(self: &Arc<Self>, timeout: Duration, every: Duration) {
        let hub = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let signalled = hub.registry.signal_stale(timeout.as_secs());
                if signalled > 0 {
                    tracing::info!(signalled, "closing stale connections");
                }
            }
        });
        self.track(handle);
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.background
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handle);
    }

    /// Stop the periodic tasks and close producer broadcasts.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
        for handle in self
            .background
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
        tracing::info!("realtime hub shut down");
    }

    /// Handle one inbound text frame. Every frame counts as a message, malformed or not;
    /// a ping also refreshes the connection's liveness stamp. Returns the reply frame, if any.
    pub async fn handle_frame(&self, entry: &ConnectionEntry, text: &str) -> Option<String> {
        let conn_id = entry.conn_id;
        self.metrics.record_message();
        let Some(event) = ClientEvent::parse(text) else {
            tracing::debug!(%conn_id, "malformed client frame");
            return None;
        };
        tracing::trace!(%conn_id, event = event.name(), "ws event");
        if event == ClientEvent::Ping {
            entry
                .last_ping_at
                .store(registry::now_secs(), Ordering::Relaxed);
        }
        self.handle_client_event(conn_id, event).await
    }

    /// Apply one client control event. Returns a frame to send straight back to the sender.
    pub async fn handle_client_event(
        &self,
        conn_id: ConnectionId,
        event: ClientEvent,
    ) -> Option<String> {
        match event {
            ClientEvent::JoinViewCount => {
                self.join(conn_id, RoomName::ViewCount);
                self.broadcast_view_count().await;
            }
            ClientEvent::JoinChat => {
                self.join(conn_id, RoomName::Chat);
                tracing::debug!(%conn_id, clients = self.rooms.members_of(&RoomName::Chat).len(), "chat room size");
            }
            ClientEvent::JoinPost(id) => self.join_opt(conn_id, RoomName::post(&id)),
            ClientEvent::JoinEvent(id) => self.join_opt(conn_id, RoomName::event(&id)),
            ClientEvent::JoinRewardFeed => self.join(conn_id, RoomName::RewardFeed),
            ClientEvent::JoinUserStatus => self.join(conn_id, RoomName::UserStatus),
            ClientEvent::JoinRoom(name) => self.join_opt(conn_id, RoomName::parse(&name)),
            ClientEvent::JoinPrivateRoom(room_id) => {
                let room = RoomName::parse_private(&room_id);
                if let Some(room) = &room {
                    tracing::debug!(%conn_id, room = %room, clients = self.rooms.members_of(room).len(), "private room size before join");
                }
                self.join_opt(conn_id, room);
            }
            ClientEvent::Authenticate(token) => {
                self.authenticate(conn_id, token.as_deref()).await;
            }
            ClientEvent::Ping => return Some(events::PONG_JSON.to_string()),
            ClientEvent::GetRooms => {
                let rooms = self.rooms.rooms_of(conn_id);
                return reply("rooms", &json!(rooms));
            }
            ClientEvent::Reconnect => {
                tracing::info!(%conn_id, "client reconnected");
                self.broadcast_view_count().await;
            }
            ClientEvent::Unknown(name) => {
                tracing::debug!(%conn_id, event = %name, "ignoring unknown client event");
            }
        }
        None
    }

    fn join(&self, conn_id: ConnectionId, room: RoomName) {
        self.rooms.join(conn_id, &room);
        tracing::debug!(%conn_id, room = %room, "joined room");
    }

    fn join_opt(&self, conn_id: ConnectionId, room: Option<RoomName>) {
        match room {
            Some(room) => self.join(conn_id, room),
            None => tracing::warn!(%conn_id, "join with empty room name ignored"),
        }
    }
}

fn reply(event_type: &str, payload: &Value) -> Option<String> {
    match events::frame(event_type, payload) {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::error!(event = event_type, error = %err, "failed to encode reply");
            None
        }
    }
}
