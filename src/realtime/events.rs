//! Wire events. Every frame is a JSON text message `{"type": ..., "payload": ...}`.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::RealtimeError;

pub const VIEW_COUNT_UPDATED: &str = "VIEW_COUNT_UPDATED";
/// Emitted by the older websocket layer; still sent to `userStatus` for old clients.
pub const GUEST_COUNT_UPDATED: &str = "GUEST_COUNT_UPDATED";
pub const NEW_MESSAGE: &str = "NEW_MESSAGE";
pub const PRIVATE_MESSAGE: &str = "PRIVATE_MESSAGE";

pub const PONG_JSON: &str = r#"{"type":"pong"}"#;

#[derive(Deserialize)]
struct WsMessage {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    payload: Value,
}

/// Control events a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinViewCount,
    JoinChat,
    JoinPost(String),
    JoinEvent(String),
    JoinRewardFeed,
    JoinUserStatus,
    JoinRoom(String),
    JoinPrivateRoom(String),
    Authenticate(Option<String>),
    Ping,
    GetRooms,
    Reconnect,
    /// Well-formed frame with a type this server does not handle.
    Unknown(String),
}

impl ClientEvent {
    /// Decode one text frame. `None` when the frame is not an event envelope, or when an id
    /// argument is missing or malformed.
    pub fn parse(text: &str) -> Option<Self> {
        let WsMessage { type_, payload } = serde_json::from_str(text).ok()?;
        let id = |payload: Value| crate::serde_id::deserialize(payload).ok().filter(|s| !s.is_empty());
        Some(match type_.as_str() {
            "joinViewCount" => Self::JoinViewCount,
            "joinChat" => Self::JoinChat,
            "joinPost" => Self::JoinPost(id(payload)?),
            "joinEvent" => Self::JoinEvent(id(payload)?),
            "joinRewardFeed" => Self::JoinRewardFeed,
            "joinUserStatus" => Self::JoinUserStatus,
            "joinRoom" => Self::JoinRoom(id(payload)?),
            "joinPrivateRoom" => Self::JoinPrivateRoom(id(payload)?),
            "authenticate" => Self::Authenticate(match payload {
                Value::String(token) => Some(token),
                _ => None,
            }),
            "ping" => Self::Ping,
            "getRooms" => Self::GetRooms,
            "reconnect" => Self::Reconnect,
            _ => Self::Unknown(type_),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::JoinViewCount => "joinViewCount",
            Self::JoinChat => "joinChat",
            Self::JoinPost(_) => "joinPost",
            Self::JoinEvent(_) => "joinEvent",
            Self::JoinRewardFeed => "joinRewardFeed",
            Self::JoinUserStatus => "joinUserStatus",
            Self::JoinRoom(_) => "joinRoom",
            Self::JoinPrivateRoom(_) => "joinPrivateRoom",
            Self::Authenticate(_) => "authenticate",
            Self::Ping => "ping",
            Self::GetRooms => "getRooms",
            Self::Reconnect => "reconnect",
            Self::Unknown(name) => name,
        }
    }
}

/// Encode an outbound frame.
pub fn frame(event_type: &str, payload: &Value) -> Result<String, RealtimeError> {
    Ok(serde_json::to_string(&json!({
        "type": event_type,
        "payload": payload,
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argumentless_events_need_no_payload() {
        assert_eq!(ClientEvent::parse(r#"{"type":"joinChat"}"#), Some(ClientEvent::JoinChat));
        assert_eq!(ClientEvent::parse(r#"{"type":"ping"}"#), Some(ClientEvent::Ping));
        assert_eq!(
            ClientEvent::parse(r#"{"type":"getRooms","payload":null}"#),
            Some(ClientEvent::GetRooms)
        );
    }

    #[test]
    fn post_ids_accept_numbers_and_strings() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"joinPost","payload":12}"#),
            Some(ClientEvent::JoinPost("12".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"type":"joinEvent","payload":"e1"}"#),
            Some(ClientEvent::JoinEvent("e1".into()))
        );
        assert_eq!(ClientEvent::parse(r#"{"type":"joinPost"}"#), None);
        assert_eq!(ClientEvent::parse(r#"{"type":"joinRoom","payload":""}"#), None);
    }

    #[test]
    fn authenticate_without_string_token_carries_none() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"authenticate","payload":"abc"}"#),
            Some(ClientEvent::Authenticate(Some("abc".into())))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"type":"authenticate"}"#),
            Some(ClientEvent::Authenticate(None))
        );
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"dance"}"#),
            Some(ClientEvent::Unknown("dance".into()))
        );
        assert_eq!(ClientEvent::parse("not json"), None);
        assert_eq!(ClientEvent::parse(r#"{"payload":1}"#), None);
    }

    #[test]
    fn frame_wraps_type_and_payload() {
        let text = frame(VIEW_COUNT_UPDATED, &json!({"viewCount": 5})).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"type": "VIEW_COUNT_UPDATED", "payload": {"viewCount": 5}}));
    }
}
