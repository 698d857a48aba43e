//! Post-hoc authentication of connections, persisted online status, and the aggregate
//! view count.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use super::events::{GUEST_COUNT_UPDATED, VIEW_COUNT_UPDATED};
use super::registry::ConnectionId;
use super::rooms::RoomName;
use super::RealtimeHub;
use crate::auth::TokenVerifier;
use crate::error::RealtimeError;
use crate::store::{IdentityKey, IdentityStore};

pub struct PresenceService {
    store: Arc<dyn IdentityStore>,
    verifier: Arc<dyn TokenVerifier>,
}

impl PresenceService {
    pub fn new(store: Arc<dyn IdentityStore>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { store, verifier }
    }

    pub async fn try_set_online(&self, key: &IdentityKey, online: bool) -> Result<(), RealtimeError> {
        self.store.set_online_status(key, online, Utc::now()).await?;
        tracing::info!(identity = %key, online, "user presence updated");
        Ok(())
    }

    /// Persist the online flag and last-active stamp. Failures are logged, never returned.
    pub async fn set_online(&self, key: &IdentityKey, online: bool) {
        if let Err(err) = self.try_set_online(key, online).await {
            tracing::error!(identity = %key, online, error = %err, "failed to update online status");
        }
    }

    async fn online_count(&self) -> Result<u64, RealtimeError> {
        Ok(self.store.find_online_count().await?)
    }
}

impl RealtimeHub {
    /// Verify `token` and bind the resulting identity to the connection: mark it online and
    /// join its personal room. Any failure leaves the connection a guest.
    pub async fn authenticate(&self, conn_id: ConnectionId, token: Option<&str>) -> Option<IdentityKey> {
        let started = Instant::now();
        let Some(token) = token.filter(|t| !t.trim().is_empty()) else {
            tracing::warn!(%conn_id, "authenticate without token");
            return None;
        };
        let verified = match self.presence.verifier.verify(token).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%conn_id, error = %err, "authentication failed");
                return None;
            }
        };
        let key = verified.key;

        let previous = match self.registry.associate(conn_id, key.clone()) {
            Ok(previous) => previous,
            Err(()) => {
                tracing::debug!(%conn_id, identity = %key, "connection closed before authentication completed");
                return None;
            }
        };
        if let Some(previous) = previous.filter(|p| *p != key) {
            self.presence.set_online(&previous, false).await;
        }

        self.presence.set_online(&key, true).await;
        self.rooms.join(conn_id, &RoomName::Personal(key.clone()));
        tracing::info!(%conn_id, identity = %key, role = verified.role.as_deref(), "user authenticated");

        self.metrics
            .record_response_time(started.elapsed().as_secs_f64() * 1000.0);
        Some(key)
    }

    /// `online identities + guests`, sent to `viewCountRoom`. Also feeds the deprecated
    /// `userStatus` room. Returns the view count.
    pub async fn try_broadcast_view_count(&self) -> Result<u64, RealtimeError> {
        let online = self.presence.online_count().await?;
        let guests = self.registry.guest_count();
        let view_count = online + guests;

        self.emit(&RoomName::ViewCount, VIEW_COUNT_UPDATED, &json!({ "viewCount": view_count }))?;
        self.emit(&RoomName::UserStatus, GUEST_COUNT_UPDATED, &json!({ "guestCount": guests }))?;
        tracing::debug!(view_count, online, guests, "view count broadcast");
        Ok(view_count)
    }

    pub async fn broadcast_view_count(&self) -> Option<u64> {
        match self.try_broadcast_view_count().await {
            Ok(n) => Some(n),
            Err(err) => {
                tracing::error!(error = %err, "failed to broadcast view count");
                None
            }
        }
    }

    /// Current view count without broadcasting it.
    pub async fn view_count(&self) -> Result<u64, RealtimeError> {
        Ok(self.presence.online_count().await? + self.registry.guest_count())
    }
}
