//! Client side of a realtime room
//!
//! [`RoomChannel`] follows a join, subscribe, track protocol: the presence
//! record is only announced once the transport has acknowledged the
//! subscription. A `track` issued earlier is held back and sent when the
//! acknowledgement arrives.
//!
//! The channel does nothing on its own; the owner drives it with
//! [`RoomChannel::next_event`] or [`RoomChannel::run`]. Presence syncs
//! replace the roster wholesale. `message` broadcasts become peer messages
//! in an attached transcript and never interact with stream sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{NotestreamError, Result};
use crate::realtime::{
    ChannelEvent, EventStream, PresenceRoster, RealtimeTransport, SubscriptionStatus,
    MESSAGE_EVENT,
};
use crate::transcript::{Message, PeerMessage, TranscriptHandle};

/// Handler for one broadcast event name
pub type BroadcastHandler = Box<dyn FnMut(&Value) + Send>;

/// Handler called with the new roster after every presence sync
pub type PresenceHandler = Box<dyn FnMut(&PresenceRoster) + Send>;

/// Join state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Subscribe sent, acknowledgement pending
    Joining,
    /// Acknowledged; presence may be tracked
    Subscribed,
    /// Left, closed or failed
    Closed,
}

/// Handle on one joined room
pub struct RoomChannel {
    transport: Arc<dyn RealtimeTransport>,
    room: String,
    participant: String,
    subscription: Uuid,
    events: EventStream,
    state: JoinState,
    pending_track: Option<Value>,
    roster: PresenceRoster,
    broadcast_handlers: HashMap<String, Vec<BroadcastHandler>>,
    presence_handlers: Vec<PresenceHandler>,
    transcript: Option<TranscriptHandle>,
}

impl std::fmt::Debug for RoomChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomChannel")
            .field("room", &self.room)
            .field("participant", &self.participant)
            .field("state", &self.state)
            .field("roster", &self.roster)
            .finish_non_exhaustive()
    }
}

impl RoomChannel {
    /// Subscribe to `room` with `participant` as presence key.
    ///
    /// The returned channel is `Joining` until the acknowledgement is
    /// processed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// use notestream::realtime::{LocalHub, RoomChannel};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let hub = Arc::new(LocalHub::new());
    /// let mut channel = RoomChannel::join(hub.clone(), "room_one", "ada").await?;
    ///
    /// channel.track(serde_json::json!({"id": "ada"})).await?;
    /// channel.wait_subscribed(Duration::from_secs(1)).await?;
    /// channel.next_event().await?;
    ///
    /// assert!(channel.roster().contains("ada"));
    /// channel.leave().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn join(
        transport: Arc<dyn RealtimeTransport>,
        room: &str,
        participant: &str,
    ) -> Result<Self> {
        let subscription = transport.subscribe(room, participant).await?;
        tracing::info!(room, participant, "Joining room");

        Ok(Self {
            transport,
            room: room.to_string(),
            participant: participant.to_string(),
            subscription: subscription.id,
            events: subscription.events,
            state: JoinState::Joining,
            pending_track: None,
            roster: PresenceRoster::new(),
            broadcast_handlers: HashMap::new(),
            presence_handlers: Vec::new(),
            transcript: None,
        })
    }

    /// Room name
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Presence key of this client
    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Current join state
    pub fn state(&self) -> JoinState {
        self.state
    }

    /// True once the subscription is acknowledged
    pub fn is_subscribed(&self) -> bool {
        self.state == JoinState::Subscribed
    }

    /// Roster as of the last presence sync
    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    /// True while a presence record waits for the acknowledgement
    pub fn has_pending_track(&self) -> bool {
        self.pending_track.is_some()
    }

    /// Register a handler for a broadcast event name
    pub fn on_broadcast(&mut self, event: &str, handler: impl FnMut(&Value) + Send + 'static) {
        self.broadcast_handlers
            .entry(event.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Register a handler for presence syncs
    pub fn on_presence_sync(&mut self, handler: impl FnMut(&PresenceRoster) + Send + 'static) {
        self.presence_handlers.push(Box::new(handler));
    }

    /// Merge `message` broadcasts into the given transcript as peer
    /// messages.
    ///
    /// Replaces any previously attached transcript.
    pub fn attach_transcript(&mut self, transcript: TranscriptHandle) {
        self.transcript = Some(transcript);
    }

    fn merge_peer_message(&self, payload: &Value) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        match serde_json::from_value::<PeerMessage>(payload.clone()) {
            Ok(message) => transcript.push(Message::peer(&self.room, &message)),
            Err(e) => tracing::warn!(room = %self.room, "Ignoring malformed room message: {}", e),
        }
    }

    /// Announce this client's presence record.
    ///
    /// Before the subscription is acknowledged the record is queued, and a
    /// later call replaces the queued record.
    ///
    /// # Errors
    ///
    /// `NotestreamError::Channel` if the channel is closed or the transport
    /// rejects the record.
    pub async fn track(&mut self, record: Value) -> Result<()> {
        match self.state {
            JoinState::Subscribed => self.transport.track(self.subscription, record).await,
            JoinState::Joining => {
                tracing::debug!(room = %self.room, "Subscription not acknowledged; queueing track");
                self.pending_track = Some(record);
                Ok(())
            }
            JoinState::Closed => Err(NotestreamError::Channel(format!(
                "cannot track on closed room {}",
                self.room
            ))
            .into()),
        }
    }

    /// Broadcast a chat message to the room.
    ///
    /// The message is also appended to the attached transcript, since the
    /// room does not echo it back to the sender.
    pub async fn send_message(
        &mut self,
        text: &str,
        user_name: &str,
        avatar: Option<&str>,
    ) -> Result<PeerMessage> {
        if self.state != JoinState::Subscribed {
            return Err(NotestreamError::Channel(format!(
                "room {} is not subscribed",
                self.room
            ))
            .into());
        }

        let message = PeerMessage {
            message: text.to_string(),
            user_name: user_name.to_string(),
            avatar: avatar.map(str::to_string),
            timestamp: Utc::now().to_rfc3339(),
        };
        self.transport
            .broadcast(
                self.subscription,
                MESSAGE_EVENT,
                serde_json::to_value(&message)?,
            )
            .await?;

        if let Some(transcript) = &self.transcript {
            transcript.push(Message::peer(&self.room, &message));
        }
        Ok(message)
    }

    /// Wait for the next event and apply it.
    ///
    /// # Returns
    ///
    /// The event, or `None` once the transport ends the subscription
    pub async fn next_event(&mut self) -> Result<Option<ChannelEvent>> {
        let Some(event) = self.events.next().await else {
            self.state = JoinState::Closed;
            return Ok(None);
        };
        self.handle(&event).await?;
        Ok(Some(event))
    }

    /// Process events until the subscription is acknowledged.
    ///
    /// # Errors
    ///
    /// `NotestreamError::Channel` if the transport reports a failure, the
    /// subscription ends, or `timeout` elapses first.
    pub async fn wait_subscribed(&mut self, timeout: Duration) -> Result<()> {
        let room = self.room.clone();
        tokio::time::timeout(timeout, self.wait_ack())
            .await
            .map_err(|_| {
                NotestreamError::Channel(format!(
                    "subscription to {} not acknowledged within {:?}",
                    room, timeout
                ))
            })?
    }

    async fn wait_ack(&mut self) -> Result<()> {
        while self.state == JoinState::Joining {
            if self.next_event().await?.is_none() {
                break;
            }
        }
        match self.state {
            JoinState::Subscribed => Ok(()),
            _ => Err(NotestreamError::Channel(format!(
                "subscription to {} ended before acknowledgement",
                self.room
            ))
            .into()),
        }
    }

    /// Process events until the subscription ends
    pub async fn run(&mut self) -> Result<()> {
        while self.next_event().await?.is_some() {}
        Ok(())
    }

    /// Leave the room
    pub async fn leave(mut self) -> Result<()> {
        self.state = JoinState::Closed;
        self.pending_track = None;
        self.transport.unsubscribe(self.subscription).await?;
        tracing::info!(room = %self.room, "Left room");
        Ok(())
    }

    async fn handle(&mut self, event: &ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::Status(status) => self.handle_status(status).await,
            ChannelEvent::PresenceSync(state) => {
                self.roster = PresenceRoster::from_state(state);
                tracing::debug!(room = %self.room, members = self.roster.len(), "Presence sync");
                for handler in self.presence_handlers.iter_mut() {
                    handler(&self.roster);
                }
                Ok(())
            }
            ChannelEvent::Broadcast { event, payload } => {
                if event == MESSAGE_EVENT {
                    self.merge_peer_message(payload);
                }
                match self.broadcast_handlers.get_mut(event) {
                    Some(handlers) => {
                        for handler in handlers.iter_mut() {
                            handler(payload);
                        }
                    }
                    None => tracing::trace!(room = %self.room, event = %event, "Unhandled broadcast"),
                }
                Ok(())
            }
        }
    }

    async fn handle_status(&mut self, status: &SubscriptionStatus) -> Result<()> {
        match status {
            SubscriptionStatus::Subscribed => {
                self.state = JoinState::Subscribed;
                tracing::info!(room = %self.room, "Subscribed");
                if let Some(record) = self.pending_track.take() {
                    self.transport.track(self.subscription, record).await?;
                }
            }
            SubscriptionStatus::TimedOut => {
                tracing::warn!(room = %self.room, "Subscription timed out");
            }
            SubscriptionStatus::Closed => {
                self.state = JoinState::Closed;
                tracing::info!(room = %self.room, "Subscription closed");
            }
            SubscriptionStatus::ChannelError(reason) => {
                self.state = JoinState::Closed;
                tracing::warn!(room = %self.room, "Channel error: {}", reason);
            }
        }
        Ok(())
    }
}
