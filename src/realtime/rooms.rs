//! Room names and connection ↔ room membership.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use super::registry::ConnectionId;
use crate::store::IdentityKey;

/// A broadcast room. `Display` renders the wire name clients and producers agree on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomName {
    Public,
    Chat,
    ViewCount,
    RewardFeed,
    /// Guest-count room of the older websocket layer. Deprecated, still served.
    UserStatus,
    Post(String),
    Event(String),
    /// Two-party room; the pair is stored sorted so both sides compute the same name.
    PrivateDm(String, String),
    /// Direct-addressing room of an authenticated identity.
    Personal(IdentityKey),
    Custom(String),
}

impl RoomName {
    pub fn post(id: impl AsRef<str>) -> Option<Self> {
        non_empty(id.as_ref()).map(Self::Post)
    }

    pub fn event(id: impl AsRef<str>) -> Option<Self> {
        non_empty(id.as_ref()).map(Self::Event)
    }

    /// Order-independent: `private("u2", "u1") == private("u1", "u2")`, rendered `u1-u2`.
    pub fn private(a: impl AsRef<str>, b: impl AsRef<str>) -> Option<Self> {
        let a = non_empty(a.as_ref())?;
        let b = non_empty(b.as_ref())?;
        Some(if a <= b {
            Self::PrivateDm(a, b)
        } else {
            Self::PrivateDm(b, a)
        })
    }

    pub fn custom(name: impl AsRef<str>) -> Option<Self> {
        non_empty(name.as_ref()).map(Self::Custom)
    }

    /// Map a wire name back to its variant. Unknown names are custom rooms.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        match name {
            "" => None,
            "public" => Some(Self::Public),
            "chat" => Some(Self::Chat),
            "viewCountRoom" => Some(Self::ViewCount),
            "rewardFeed" => Some(Self::RewardFeed),
            "userStatus" => Some(Self::UserStatus),
            _ => {
                if let Some(id) = name.strip_prefix("post:") {
                    Self::post(id)
                } else if let Some(id) = name.strip_prefix("event:") {
                    Self::event(id)
                } else {
                    Self::custom(name)
                }
            }
        }
    }

    /// Room id sent with `joinPrivateRoom`. Any id made of exactly two identity keys joined by
    /// one `-` is treated as a pair and reordered, so `room-lobby` becomes `lobby-room`.
    /// Producers addressing such a room must build it the same way (`private` or this
    /// function), not through [`RoomName::parse`]. Anything else is joined verbatim.
    pub fn parse_private(room_id: &str) -> Option<Self> {
        let room_id = room_id.trim();
        let pair = room_id.split_once('-').and_then(|(a, b)| {
            let a = IdentityKey::parse(a)?;
            let b = IdentityKey::parse(b)?;
            (!b.as_str().contains('-')).then_some((a, b))
        });
        match pair {
            Some((a, b)) => Self::private(a.as_str(), b.as_str()),
            None => Self::custom(room_id),
        }
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => f.write_str("public"),
            Self::Chat => f.write_str("chat"),
            Self::ViewCount => f.write_str("viewCountRoom"),
            Self::RewardFeed => f.write_str("rewardFeed"),
            Self::UserStatus => f.write_str("userStatus"),
            Self::Post(id) => write!(f, "post:{id}"),
            Self::Event(id) => write!(f, "event:{id}"),
            Self::PrivateDm(a, b) => write!(f, "{a}-{b}"),
            Self::Personal(key) => f.write_str(key.as_str()),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Many-to-many membership keyed by rendered room name. Connection lifetime is owned by
/// the registry; this only keeps the back-references.
#[derive(Default)]
pub struct RoomManager {
    members: DashMap<String, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the connection was already a member.
    pub fn join(&self, conn_id: ConnectionId, room: &RoomName) -> bool {
        let name = room.to_string();
        let added = self
            .members
            .entry(name.clone())
            .or_default()
            .insert(conn_id);
        self.memberships.entry(conn_id).or_default().insert(name);
        added
    }

    pub fn members_of(&self, room: &RoomName) -> HashSet<ConnectionId> {
        self.members
            .get(&room.to_string())
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Rendered names of every room the connection is in, sorted for stable output.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .memberships
            .get(&conn_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Drop every membership of a departing connection. Empty rooms are forgotten.
    pub fn leave_all(&self, conn_id: ConnectionId) {
        let Some((_, rooms)) = self.memberships.remove(&conn_id) else {
            return;
        };
        for name in rooms {
            let mut empty = false;
            if let Some(mut set) = self.members.get_mut(&name) {
                set.remove(&conn_id);
                empty = set.is_empty();
            }
            if empty {
                self.members.remove_if(&name, |_, set| set.is_empty());
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_rooms_render_their_wire_names() {
        assert_eq!(RoomName::Public.to_string(), "public");
        assert_eq!(RoomName::Chat.to_string(), "chat");
        assert_eq!(RoomName::ViewCount.to_string(), "viewCountRoom");
        assert_eq!(RoomName::RewardFeed.to_string(), "rewardFeed");
        assert_eq!(RoomName::post("p1").unwrap().to_string(), "post:p1");
        assert_eq!(RoomName::event("e9").unwrap().to_string(), "event:e9");
    }

    #[test]
    fn private_room_is_order_independent() {
        let from_a = RoomName::private("u1", "u2").unwrap();
        let from_b = RoomName::private("u2", "u1").unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_a.to_string(), "u1-u2");
        assert!(RoomName::private("u1", " ").is_none());
    }

    #[test]
    fn parse_round_trips_known_names() {
        for name in ["public", "chat", "viewCountRoom", "rewardFeed", "userStatus", "post:3", "event:4"] {
            assert_eq!(RoomName::parse(name).unwrap().to_string(), name);
        }
        assert_eq!(RoomName::parse("lobby"), Some(RoomName::Custom("lobby".into())));
        assert!(RoomName::parse("").is_none());
        assert!(RoomName::parse("post:").is_none());
    }

    #[test]
    fn private_room_ids_from_clients_are_normalised() {
        assert_eq!(RoomName::parse_private("u2-u1").unwrap().to_string(), "u1-u2");
        assert_eq!(RoomName::parse_private("room-lobby").unwrap().to_string(), "lobby-room");
        assert_eq!(
            RoomName::parse_private("-u1"),
            Some(RoomName::Custom("-u1".into()))
        );
        assert_eq!(
            RoomName::parse_private("a-b-c"),
            Some(RoomName::Custom("a-b-c".into()))
        );
        assert_eq!(
            RoomName::parse_private("solo"),
            Some(RoomName::Custom("solo".into()))
        );
    }

    #[test]
    fn join_is_idempotent_and_leave_all_cleans_up() {
        let rooms = RoomManager::new();
        let a = ConnectionId(1);
        let b = ConnectionId(2);
        assert!(rooms.join(a, &RoomName::Chat));
        assert!(!rooms.join(a, &RoomName::Chat));
        rooms.join(b, &RoomName::Chat);
        rooms.join(a, &RoomName::Public);

        assert_eq!(rooms.members_of(&RoomName::Chat).len(), 2);
        assert_eq!(rooms.rooms_of(a), vec!["chat".to_string(), "public".to_string()]);

        rooms.leave_all(a);
        assert_eq!(rooms.members_of(&RoomName::Chat), HashSet::from([b]));
        assert!(rooms.members_of(&RoomName::Public).is_empty());
        assert!(rooms.rooms_of(a).is_empty());
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn empty_room_has_no_members() {
        let rooms = RoomManager::new();
        assert!(rooms.members_of(&RoomName::RewardFeed).is_empty());
    }
}
