//! In-process realtime transport
//!
//! [`LocalHub`] hosts any number of rooms inside one process. Every
//! subscription gets its own unbounded channel of [`ChannelEvent`]s:
//!
//! - subscribing queues `Status(Subscribed)` followed by the room's current
//!   presence snapshot;
//! - tracking or leaving resends the snapshot to every member of the room;
//! - broadcasts reach every member except the sender.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::error::{NotestreamError, Result};
use crate::realtime::{
    ChannelEvent, PresenceState, RealtimeTransport, Subscription, SubscriptionStatus,
};

#[derive(Debug)]
struct Member {
    room: String,
    presence_key: String,
    sender: mpsc::UnboundedSender<ChannelEvent>,
    record: Option<Value>,
}

#[derive(Debug, Default)]
struct HubState {
    members: HashMap<Uuid, Member>,
}

impl HubState {
    fn presence_state(&self, room: &str) -> PresenceState {
        let mut state = PresenceState::new();
        for member in self.members.values().filter(|m| m.room == room) {
            if let Some(record) = &member.record {
                state
                    .entry(member.presence_key.clone())
                    .or_default()
                    .push(record.clone());
            }
        }
        state
    }

    fn sync_room(&self, room: &str) {
        let state = self.presence_state(room);
        for member in self.members.values().filter(|m| m.room == room) {
            if member
                .sender
                .send(ChannelEvent::PresenceSync(state.clone()))
                .is_err()
            {
                tracing::debug!(room, key = %member.presence_key, "Dropping sync for closed subscriber");
            }
        }
    }
}

/// In-process hub implementing [`RealtimeTransport`]
///
/// Clones share the same rooms.
///
/// # Examples
///
/// ```
/// use notestream::realtime::{LocalHub, RealtimeTransport};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let hub = LocalHub::new();
/// let sub = hub.subscribe("room_one", "ada").await?;
/// hub.track(sub.id, serde_json::json!({"id": "ada"})).await?;
///
/// assert!(hub.presence_state("room_one").contains_key("ada"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Creates a hub with no rooms
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current presence snapshot of a room
    pub fn presence_state(&self, room: &str) -> PresenceState {
        self.lock().presence_state(room)
    }

    /// Number of subscriptions in a room
    pub fn member_count(&self, room: &str) -> usize {
        self.lock().members.values().filter(|m| m.room == room).count()
    }

    /// Report a failure to one subscription and drop it from its room
    pub fn fail_subscription(&self, subscription: Uuid, reason: &str) {
        let mut state = self.lock();
        if let Some(member) = state.members.remove(&subscription) {
            let _ = member.sender.send(ChannelEvent::Status(
                SubscriptionStatus::ChannelError(reason.to_string()),
            ));
            state.sync_room(&member.room);
        }
    }
}

#[async_trait::async_trait]
impl RealtimeTransport for LocalHub {
    async fn subscribe(&self, room: &str, presence_key: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        let mut state = self.lock();
        let snapshot = state.presence_state(room);
        sender
            .send(ChannelEvent::Status(SubscriptionStatus::Subscribed))
            .and_then(|_| sender.send(ChannelEvent::PresenceSync(snapshot)))
            .map_err(|_| NotestreamError::Channel("subscriber closed during join".into()))?;

        state.members.insert(
            id,
            Member {
                room: room.to_string(),
                presence_key: presence_key.to_string(),
                sender,
                record: None,
            },
        );
        tracing::debug!(room, presence_key, subscription = %id, "Subscribed");

        Ok(Subscription {
            id,
            events: Box::pin(UnboundedReceiverStream::new(receiver)),
        })
    }

    async fn track(&self, subscription: Uuid, record: Value) -> Result<()> {
        let mut state = self.lock();
        let member = state.members.get_mut(&subscription).ok_or_else(|| {
            NotestreamError::Channel(format!("unknown subscription {}", subscription))
        })?;
        member.record = Some(record);
        let room = member.room.clone();
        state.sync_room(&room);
        Ok(())
    }

    async fn broadcast(&self, subscription: Uuid, event: &str, payload: Value) -> Result<()> {
        let state = self.lock();
        let sender = state.members.get(&subscription).ok_or_else(|| {
            NotestreamError::Channel(format!("unknown subscription {}", subscription))
        })?;

        for (id, member) in state.members.iter() {
            if *id == subscription || member.room != sender.room {
                continue;
            }
            let delivered = member.sender.send(ChannelEvent::Broadcast {
                event: event.to_string(),
                payload: payload.clone(),
            });
            if delivered.is_err() {
                tracing::debug!(key = %member.presence_key, "Broadcast to closed subscriber dropped");
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscription: Uuid) -> Result<()> {
        let mut state = self.lock();
        if let Some(member) = state.members.remove(&subscription) {
            let _ = member
                .sender
                .send(ChannelEvent::Status(SubscriptionStatus::Closed));
            if member.record.is_some() {
                state.sync_room(&member.room);
            }
            tracing::debug!(room = %member.room, subscription = %subscription, "Unsubscribed");
        }
        Ok(())
    }
}
