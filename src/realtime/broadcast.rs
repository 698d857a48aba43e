//! Producer-facing broadcast: resolve a logical target to a room and fan a typed event out
//! to its members.

use std::sync::atomic::Ordering;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::events::{frame, NEW_MESSAGE, PRIVATE_MESSAGE};
use super::rooms::RoomName;
use super::RealtimeHub;
use crate::error::RealtimeError;

/// Where a producer wants an event delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub room: Option<RoomName>,
    pub post_id: Option<String>,
    pub event_id: Option<String>,
}

impl BroadcastTarget {
    pub fn room(room: RoomName) -> Self {
        Self {
            room: Some(room),
            ..Self::default()
        }
    }

    pub fn post(post_id: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            ..Self::default()
        }
    }

    pub fn event(event_id: impl Into<String>) -> Self {
        Self {
            event_id: Some(event_id.into()),
            ..Self::default()
        }
    }

    /// Explicit room, then post, then event, else `public`.
    pub fn resolve(&self) -> RoomName {
        if let Some(room) = &self.room {
            return room.clone();
        }
        self.post_id
            .as_deref()
            .and_then(RoomName::post)
            .or_else(|| self.event_id.as_deref().and_then(RoomName::event))
            .unwrap_or(RoomName::Public)
    }
}

/// A broadcast described as JSON by a route handler: `{type, data, room?, postId?, eventId?}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default, deserialize_with = "crate::serde_id::opt::deserialize")]
    pub post_id: Option<String>,
    #[serde(default, deserialize_with = "crate::serde_id::opt::deserialize")]
    pub event_id: Option<String>,
}

impl BroadcastRequest {
    pub fn target(&self) -> BroadcastTarget {
        BroadcastTarget {
            room: self.room.as_deref().and_then(RoomName::parse),
            post_id: self.post_id.clone(),
            event_id: self.event_id.clone(),
        }
    }
}

/// Result of a producer broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The hub has not been initialized; nothing was sent.
    Dropped,
    Sent { room: String, recipients: usize },
}

/// Copy of `payload` with `extra` fields set. Object payloads are merged, `null` becomes an
/// empty object, anything else is kept under `data`.
fn with_fields(payload: &Value, extra: &[(&str, &str)]) -> Value {
    let mut map = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other.clone());
            map
        }
    };
    for (k, v) in extra {
        map.insert((*k).to_string(), Value::String((*v).to_string()));
    }
    Value::Object(map)
}

impl RealtimeHub {
    /// Send one frame to every current member of `room`. Returns the number of connections
    /// the frame was queued for; an empty room is a no-op.
    pub(crate) fn emit(
        &self,
        room: &RoomName,
        event_type: &str,
        payload: &Value,
    ) -> Result<usize, RealtimeError> {
        let members = self.rooms.members_of(room);
        if members.is_empty() {
            return Ok(0);
        }
        let text = frame(event_type, payload)?;
        Ok(members
            .into_iter()
            .filter(|conn_id| self.registry.send(*conn_id, &text))
            .count())
    }

    /// Emit `event_type` to the resolved room with `roomId` merged into a copy of `payload`.
    /// Before [`RealtimeHub::initialize`] this logs and drops the event.
    pub fn broadcast(&self, event_type: &str, payload: &Value, target: &BroadcastTarget) -> Delivery {
        if !self.initialized.load(Ordering::Acquire) {
            tracing::warn!(event = event_type, "realtime hub not initialized, skipping broadcast");
            return Delivery::Dropped;
        }
        let started = Instant::now();
        let room = target.resolve();
        let room_id = room.to_string();
        tracing::debug!(
            event = event_type,
            room = %room_id,
            clients = self.rooms.members_of(&room).len(),
            "broadcasting"
        );

        let body = with_fields(payload, &[("roomId", &room_id)]);
        match self.emit(&room, event_type, &body) {
            Ok(recipients) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.record_response_time(elapsed_ms);
                tracing::info!(event = event_type, room = %room_id, recipients, elapsed_ms, "broadcast sent");
                Delivery::Sent {
                    room: room_id,
                    recipients,
                }
            }
            Err(err) => {
                tracing::error!(event = event_type, room = %room_id, error = %err, "broadcast failed");
                Delivery::Sent {
                    room: room_id,
                    recipients: 0,
                }
            }
        }
    }

    pub fn broadcast_request(&self, request: &BroadcastRequest) -> Delivery {
        self.broadcast(&request.event_type, &request.data, &request.target())
    }

    /// Group chat message, after the producer has stored it.
    pub fn broadcast_chat_message(&self, message: &Value) -> Delivery {
        self.broadcast(NEW_MESSAGE, message, &BroadcastTarget::room(RoomName::Chat))
    }

    /// Two-party message to the room both participants derive from their sorted ids.
    pub fn broadcast_private_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        message: &Value,
    ) -> Delivery {
        let Some(room) = RoomName::private(sender_id, receiver_id) else {
            tracing::warn!(sender_id, receiver_id, "private message without both participants");
            return Delivery::Dropped;
        };
        let body = with_fields(
            message,
            &[("senderId", sender_id), ("receiverId", receiver_id)],
        );
        self.broadcast(PRIVATE_MESSAGE, &body, &BroadcastTarget::room(room))
    }
}
