//! Transcript message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::NotestreamError;

/// Identifier of a transcript message.
///
/// Ids carry a namespace prefix so that messages created locally, by the
/// assistant stream, by a realtime room or loaded from storage can never
/// collide:
///
/// - `local:<ulid>`
/// - `stream:<ulid>`
/// - `peer:<room>:<ulid>`
/// - `stored:<row id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh id for a message authored on this client
    pub fn local() -> Self {
        Self(format!("local:{}", Ulid::new()))
    }

    /// Fresh id for an assistant message built from a response stream
    pub fn stream() -> Self {
        Self(format!("stream:{}", Ulid::new()))
    }

    /// Fresh id for a message delivered over a realtime room
    pub fn peer(room: &str) -> Self {
        Self(format!("peer:{}:{}", room, Ulid::new()))
    }

    /// Id for a message loaded from the conversation store
    pub fn stored(row_id: i64) -> Self {
        Self(format!("stored:{}", row_id))
    }

    /// The namespace prefix (`local`, `stream`, `peer`, `stored`)
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// Borrow the id as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human participant
    User,
    /// The question-answering assistant
    Assistant,
}

impl Role {
    /// Lowercase wire/storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NotestreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(NotestreamError::Storage(format!("unknown role: {}", other))),
        }
    }
}

/// Whether an assistant message may still receive content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Still receiving deltas
    Open,
    /// Finalized; never mutated again
    Closed,
}

/// Where a message came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageOrigin {
    /// Typed on this client, or a locally synthesized notice
    Local,
    /// Built from the assistant response stream
    Stream,
    /// Broadcast by a peer in a realtime room
    Peer {
        /// Room the message was broadcast on
        room: String,
        /// Display name of the sender
        user_name: String,
        /// Avatar URL of the sender
        avatar: Option<String>,
    },
    /// Loaded from the conversation store
    Stored,
}

/// Chat payload carried by a room `message` broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Message text
    pub message: String,
    /// Display name of the sender
    #[serde(default)]
    pub user_name: String,
    /// Avatar URL of the sender
    #[serde(default)]
    pub avatar: Option<String>,
    /// ISO-8601 send time
    #[serde(default)]
    pub timestamp: String,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id within the transcript
    pub id: MessageId,
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Open while the assistant is still streaming into it
    pub status: MessageStatus,
    /// Source of the message
    pub origin: MessageOrigin,
}

impl Message {
    /// A user message typed on this client
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::transcript::{Message, Role};
    ///
    /// let message = Message::user("What is osmosis?");
    /// assert_eq!(message.role, Role::User);
    /// assert!(message.id.as_str().starts_with("local:"));
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            status: MessageStatus::Closed,
            origin: MessageOrigin::Local,
        }
    }

    /// A closed assistant message synthesized on this client
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::local(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            status: MessageStatus::Closed,
            origin: MessageOrigin::Local,
        }
    }

    /// An open assistant message for a response stream
    pub fn streaming(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::stream(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            status: MessageStatus::Open,
            origin: MessageOrigin::Stream,
        }
    }

    /// A message received over a realtime room
    pub fn peer(room: &str, payload: &PeerMessage) -> Self {
        let created_at = DateTime::parse_from_rfc3339(&payload.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Self {
            id: MessageId::peer(room),
            role: Role::User,
            content: payload.message.clone(),
            created_at,
            status: MessageStatus::Closed,
            origin: MessageOrigin::Peer {
                room: room.to_string(),
                user_name: payload.user_name.clone(),
                avatar: payload.avatar.clone(),
            },
        }
    }

    /// A message loaded from storage
    pub fn stored(row_id: i64, role: Role, content: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::stored(row_id),
            role,
            content,
            created_at,
            status: MessageStatus::Closed,
            origin: MessageOrigin::Stored,
        }
    }

    /// True while the message accepts deltas
    pub fn is_open(&self) -> bool {
        self.status == MessageStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_namespaces_are_disjoint() {
        assert_eq!(MessageId::local().namespace(), "local");
        assert_eq!(MessageId::stream().namespace(), "stream");
        assert_eq!(MessageId::peer("room_one").namespace(), "peer");
        assert_eq!(MessageId::stored(7).as_str(), "stored:7");
        assert_ne!(MessageId::stream(), MessageId::stream());
    }

    #[test]
    fn test_peer_id_is_tagged_with_room() {
        let id = MessageId::peer("room_one");
        assert!(id.as_str().starts_with("peer:room_one:"));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_streaming_message_is_open() {
        let message = Message::streaming("Hel");
        assert!(message.is_open());
        assert_eq!(message.origin, MessageOrigin::Stream);
    }

    #[test]
    fn test_peer_message_uses_payload_timestamp() {
        let payload = PeerMessage {
            message: "hi all".to_string(),
            user_name: "ada@example.com".to_string(),
            avatar: None,
            timestamp: "2025-09-06T10:15:00Z".to_string(),
        };
        let message = Message::peer("room_one", &payload);
        assert_eq!(message.content, "hi all");
        assert_eq!(message.created_at.to_rfc3339(), "2025-09-06T10:15:00+00:00");
        assert!(!message.is_open());
    }

    #[test]
    fn test_peer_message_bad_timestamp_falls_back_to_now() {
        let payload = PeerMessage {
            message: "hi".to_string(),
            user_name: String::new(),
            avatar: None,
            timestamp: "yesterday".to_string(),
        };
        let before = Utc::now();
        let message = Message::peer("r", &payload);
        assert!(message.created_at >= before);
    }
}
