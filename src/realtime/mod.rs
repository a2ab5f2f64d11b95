//! Realtime room presence and broadcast
//!
//! A room is a named channel shared by several clients. Each client
//! subscribes under a presence key (its user id), announces a presence
//! record once the subscription is acknowledged, and exchanges broadcast
//! events with the other members.
//!
//! - [`RealtimeTransport`] -- the wire side: subscribe, track, broadcast,
//!   unsubscribe, plus a stream of [`ChannelEvent`]s per subscription.
//! - [`local::LocalHub`] -- in-process transport backed by tokio channels.
//! - [`channel::RoomChannel`] -- the client side state machine that drives
//!   a subscription and merges roster and peer messages into local state.

pub mod channel;
pub mod local;

use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

pub use channel::RoomChannel;
pub use local::LocalHub;

/// Broadcast event name carrying chat messages
pub const MESSAGE_EVENT: &str = "message";

/// Subscription lifecycle reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// The subscription is active; presence may be tracked
    Subscribed,
    /// The transport gave up waiting for the server
    TimedOut,
    /// The subscription was closed
    Closed,
    /// The server rejected or dropped the subscription
    ChannelError(String),
}

/// Presence records by presence key
pub type PresenceState = HashMap<String, Vec<Value>>;

/// One event delivered on a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Subscription status changed
    Status(SubscriptionStatus),
    /// Authoritative presence snapshot of the room
    PresenceSync(PresenceState),
    /// Event broadcast by another member
    Broadcast {
        /// Event name, e.g. `message`
        event: String,
        /// Event payload
        payload: Value,
    },
}

/// Stream of events for one subscription
pub type EventStream = Pin<Box<dyn Stream<Item = ChannelEvent> + Send>>;

/// A live subscription
pub struct Subscription {
    /// Transport assigned id used for later calls
    pub id: Uuid,
    /// Events for this subscription, starting with its status
    pub events: EventStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Wire side of a realtime room
#[async_trait::async_trait]
pub trait RealtimeTransport: Send + Sync + std::fmt::Debug {
    /// Subscribe to a room under the given presence key
    async fn subscribe(&self, room: &str, presence_key: &str) -> Result<Subscription>;

    /// Announce the subscriber's presence record
    ///
    /// # Errors
    ///
    /// Returns `NotestreamError::Channel` if the subscription is not
    /// acknowledged yet or no longer exists.
    async fn track(&self, subscription: Uuid, record: Value) -> Result<()>;

    /// Send an event to every other member of the room
    async fn broadcast(&self, subscription: Uuid, event: &str, payload: Value) -> Result<()>;

    /// Leave the room
    async fn unsubscribe(&self, subscription: Uuid) -> Result<()>;
}

/// Set of participants present in a room
///
/// Each presence sync replaces the roster wholesale.
///
/// # Examples
///
/// ```
/// use notestream::realtime::{PresenceRoster, PresenceState};
///
/// let mut state = PresenceState::new();
/// state.insert("bob".to_string(), vec![]);
/// state.insert("ada".to_string(), vec![]);
///
/// let roster = PresenceRoster::from_state(&state);
/// assert_eq!(roster.to_vec(), vec!["ada", "bob"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRoster {
    members: BTreeSet<String>,
}

impl PresenceRoster {
    /// Empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster made of the state's presence keys
    pub fn from_state(state: &PresenceState) -> Self {
        Self {
            members: state.keys().cloned().collect(),
        }
    }

    /// True if the participant is present
    pub fn contains(&self, participant: &str) -> bool {
        self.members.contains(participant)
    }

    /// Number of participants
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when nobody is present
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Participants in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// Participants in sorted order, owned
    pub fn to_vec(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }
}
