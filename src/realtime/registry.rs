//! Live connection registry: connection ids, the connection → identity association, the guest
//! counter, and the connect/disconnect lifecycle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::rooms::RoomName;
use super::RealtimeHub;
use crate::store::IdentityKey;

const OUTBOUND_BUFFER: usize = 64;

/// Opaque id of one live socket, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub(crate) u64);

impl ConnectionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-connection state: sender to push frames to the socket task, last ping time for timeout.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub conn_id: ConnectionId,
    pub tx: mpsc::Sender<String>,
    /// Unix timestamp (seconds) when we last received a ping from the client.
    pub last_ping_at: AtomicU64,
    /// Signalled when the registry wants the socket task to close (stale sweep).
    pub close: Notify,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of live connections. Thread-safe; owned by the hub.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
    identities: DashMap<ConnectionId, IdentityKey>,
    guest_count: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            identities: DashMap::new(),
            guest_count: AtomicU64::new(0),
        }
    }

    /// Register a new guest connection. Returns the entry and the receiver for the send task.
    fn register(&self) -> (Arc<ConnectionEntry>, mpsc::Receiver<String>) {
        let conn_id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let entry = Arc::new(ConnectionEntry {
            conn_id,
            tx,
            last_ping_at: AtomicU64::new(now_secs()),
            close: Notify::new(),
        });
        self.connections.insert(conn_id, entry.clone());
        self.guest_count.fetch_add(1, Ordering::SeqCst);
        (entry, rx)
    }

    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains_key(&conn_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn guest_count(&self) -> u64 {
        self.guest_count.load(Ordering::SeqCst)
    }

    /// Connections with an authenticated identity.
    pub fn online_user_count(&self) -> usize {
        self.identities.len()
    }

    pub fn identity_of(&self, conn_id: ConnectionId) -> Option<IdentityKey> {
        self.identities.get(&conn_id).map(|k| k.clone())
    }

    /// Associate an identity with a live connection. The guest counter is untouched; it only
    /// moves on connect and disconnect. Returns the identity it replaced, if any; `Err` when
    /// the connection is gone.
    pub(crate) fn associate(
        &self,
        conn_id: ConnectionId,
        identity: IdentityKey,
    ) -> Result<Option<IdentityKey>, ()> {
        if !self.contains(conn_id) {
            return Err(());
        }
        Ok(self.identities.insert(conn_id, identity))
    }

    fn decrement_guests(&self) {
        // Floor at zero.
        let _ = self
            .guest_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Remove a connection. `None` when it was never registered or is already gone; otherwise
    /// the identity it carried. Only a guest (`None` inside) releases a guest slot.
    fn remove(&self, conn_id: ConnectionId) -> Option<Option<IdentityKey>> {
        self.connections.remove(&conn_id)?;
        match self.identities.remove(&conn_id) {
            Some((_, identity)) => Some(Some(identity)),
            None => {
                self.decrement_guests();
                Some(None)
            }
        }
    }

    /// Queue a frame for one connection. A full buffer drops the frame; the connection stays.
    pub fn send(&self, conn_id: ConnectionId, frame: &str) -> bool {
        let Some(entry) = self.connections.get(&conn_id) else {
            return false;
        };
        if entry.tx.try_send(frame.to_string()).is_err() {
            tracing::debug!(%conn_id, "ws send try_send full");
            return false;
        }
        true
    }

    /// Ask connections that have not pinged in more than `max_age_secs` to close. Their
    /// socket tasks run the regular disconnect path. Returns how many were signalled.
    pub fn signal_stale(&self, max_age_secs: u64) -> usize {
        let now = now_secs();
        let mut signalled = 0;
        for entry in self.connections.iter() {
            if now.saturating_sub(entry.last_ping_at.load(Ordering::Relaxed)) > max_age_secs {
                entry.close.notify_one();
                signalled += 1;
            }
        }
        signalled
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    /// Register a fresh connection as a guest, join it to `public` and announce the new view
    /// count in the background. The caller must call [`RealtimeHub::on_disconnect`] when the
    /// socket closes.
    pub fn on_connect(self: &Arc<Self>) -> (Arc<ConnectionEntry>, mpsc::Receiver<String>) {
        let (entry, rx) = self.registry.register();
        self.rooms.join(entry.conn_id, &RoomName::Public);
        let active = self.metrics.record_connect();
        tracing::info!(conn_id = %entry.conn_id, active, "client connected");

        let hub = Arc::clone(self);
        self.tasks.spawn("view-count-on-connect", async move {
            hub.try_broadcast_view_count().await.map(|_| ())
        });
        (entry, rx)
    }

    /// Tear down a connection. Counters and memberships update before this returns; marking
    /// the identity offline and re-announcing the view count run as a supervised task whose
    /// handle is returned. Unknown or already-removed ids are ignored.
    pub fn on_disconnect(
        self: &Arc<Self>,
        conn_id: ConnectionId,
        reason: &str,
    ) -> Option<JoinHandle<()>> {
        let Some(identity) = self.registry.remove(conn_id) else {
            tracing::debug!(%conn_id, reason, "disconnect for unknown connection");
            return None;
        };
        self.rooms.leave_all(conn_id);
        let active = self.metrics.record_disconnect();
        tracing::info!(
            %conn_id,
            reason,
            identity = identity.as_ref().map(|k| k.as_str()),
            active,
            "client disconnected"
        );

        let hub = Arc::clone(self);
        Some(self.tasks.spawn("disconnect-cleanup", async move {
            let offline = match &identity {
                Some(key) => hub.presence.try_set_online(key, false).await,
                None => Ok(()),
            };
            let view_count = hub.try_broadcast_view_count().await.map(|_| ());
            offline.and(view_count)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_counter_floors_at_zero() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register();
        assert_eq!(registry.guest_count(), 1);
        registry.decrement_guests();
        assert_eq!(registry.guest_count(), 0);
        assert_eq!(registry.remove(a.conn_id), Some(None));
        assert_eq!(registry.guest_count(), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register();
        assert!(registry.remove(a.conn_id).is_some());
        assert!(registry.remove(a.conn_id).is_none());
        assert!(registry.remove(ConnectionId(999)).is_none());
    }

    #[test]
    fn association_leaves_guest_counter_alone() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = registry.register();
        let u1 = IdentityKey::parse("u1").unwrap();
        let u2 = IdentityKey::parse("u2").unwrap();

        assert_eq!(registry.associate(a.conn_id, u1.clone()), Ok(None));
        assert_eq!(registry.guest_count(), 1);
        assert_eq!(registry.associate(a.conn_id, u2), Ok(Some(u1)));
        assert_eq!(registry.guest_count(), 1);
        assert_eq!(registry.online_user_count(), 1);

        let gone = ConnectionId(42);
        assert!(registry.associate(gone, IdentityKey::parse("u3").unwrap()).is_err());
    }

    #[test]
    fn removing_an_authenticated_connection_keeps_guest_count() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = registry.register();
        let (_b, _rx_b) = registry.register();
        registry
            .associate(a.conn_id, IdentityKey::parse("u1").unwrap())
            .unwrap();
        assert_eq!(registry.guest_count(), 2);
        assert_eq!(
            registry.remove(a.conn_id),
            Some(Some(IdentityKey::parse("u1").unwrap()))
        );
        assert_eq!(registry.guest_count(), 2);
    }

    #[tokio::test]
    async fn send_queues_frames_for_live_connections_only() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx) = registry.register();
        assert!(registry.send(a.conn_id, "hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
        assert!(!registry.send(ConnectionId(77), "nobody"));
    }

    #[tokio::test]
    async fn stale_connections_are_signalled_to_close() {
        let registry = ConnectionRegistry::new();
        let (stale, _rx_a) = registry.register();
        let (fresh, _rx_b) = registry.register();
        stale.last_ping_at.store(0, Ordering::Relaxed);

        assert_eq!(registry.signal_stale(300), 1);
        tokio::time::timeout(std::time::Duration::from_secs(1), stale.close.notified())
            .await
            .unwrap();
        assert!(registry.contains(fresh.conn_id));
    }
}
