//! Conversation transcript state
//!
//! A [`Transcript`] is the ordered, append-only list of messages of one
//! conversation. At most one assistant message is open at a time.
//!
//! A [`TranscriptHandle`] shares one transcript between the stream session
//! controller and a realtime room channel, and lets renderers observe every
//! change through a `tokio::sync::watch` receiver.

pub mod assembler;
pub mod message;

use std::sync::Arc;

use tokio::sync::watch;

pub use assembler::{Finalization, TranscriptAssembler, FAILURE_NOTICE};
pub use message::{Message, MessageId, MessageOrigin, MessageStatus, PeerMessage, Role};

/// Ordered message list of one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Creates an empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcript from already-closed messages
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut transcript = Self::new();
        for message in messages {
            transcript.push(message);
        }
        transcript
    }

    /// All messages in arrival order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when there are no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last message, if any
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Look up a message by id
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|i| &self.messages[i])
    }

    /// The currently open assistant message
    pub fn open_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_open())
    }

    /// Append a message.
    ///
    /// Appending an open message closes whichever message was open before.
    pub fn push(&mut self, message: Message) {
        if message.is_open() {
            if let Some(previous) = self.close_open() {
                tracing::debug!("Closed {} before opening {}", previous, message.id);
            }
        }
        self.messages.push(message);
    }

    /// Replace the content of an open message.
    ///
    /// Returns false when the message is missing or already closed; closed
    /// messages are never mutated.
    pub fn replace_open_content(&mut self, id: &MessageId, content: &str) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        let current = &self.messages[index];
        if !current.is_open() {
            return false;
        }
        self.messages[index] = Message {
            content: content.to_string(),
            ..current.clone()
        };
        true
    }

    /// Close a specific message. Returns true if it was open.
    pub fn close(&mut self, id: &MessageId) -> bool {
        match self.position(id) {
            Some(index) if self.messages[index].is_open() => {
                self.messages[index].status = MessageStatus::Closed;
                true
            }
            _ => false,
        }
    }

    /// Close whichever message is open, returning its id
    pub fn close_open(&mut self) -> Option<MessageId> {
        let message = self.messages.iter_mut().rev().find(|m| m.is_open())?;
        message.status = MessageStatus::Closed;
        Some(message.id.clone())
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        // The message being updated is almost always the last one.
        self.messages.iter().rposition(|m| &m.id == id)
    }
}

/// Shared, observable transcript
///
/// Clones refer to the same transcript.
///
/// # Examples
///
/// ```
/// use notestream::transcript::{Message, TranscriptHandle};
///
/// let handle = TranscriptHandle::new();
/// let mut rx = handle.subscribe();
///
/// handle.update(|t| {
///     t.push(Message::user("hello"));
///     true
/// });
///
/// assert!(rx.has_changed().unwrap());
/// assert_eq!(rx.borrow_and_update().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct TranscriptHandle {
    tx: Arc<watch::Sender<Transcript>>,
}

impl TranscriptHandle {
    /// Creates a handle around an empty transcript
    pub fn new() -> Self {
        Self::with_transcript(Transcript::new())
    }

    /// Creates a handle around an existing transcript
    pub fn with_transcript(transcript: Transcript) -> Self {
        let (tx, _rx) = watch::channel(transcript);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver notified after every change
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.tx.subscribe()
    }

    /// Copy of the current transcript
    pub fn snapshot(&self) -> Transcript {
        self.tx.borrow().clone()
    }

    /// Mutate the transcript in place.
    ///
    /// The closure returns whether it changed anything; observers are only
    /// notified when it did.
    pub fn update(&self, modify: impl FnOnce(&mut Transcript) -> bool) -> bool {
        self.tx.send_if_modified(modify)
    }

    /// Append a message and notify observers
    pub fn push(&self, message: Message) {
        self.update(|t| {
            t.push(message);
            true
        });
    }

    /// Replace the whole transcript
    pub fn replace(&self, transcript: Transcript) {
        self.tx.send_replace(transcript);
    }
}

impl Default for TranscriptHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_open_closes_previous_open() {
        let mut transcript = Transcript::new();
        let first = Message::streaming("a");
        let first_id = first.id.clone();
        transcript.push(first);
        transcript.push(Message::streaming("b"));

        assert!(!transcript.get(&first_id).unwrap().is_open());
        assert_eq!(
            transcript.messages().iter().filter(|m| m.is_open()).count(),
            1
        );
    }

    #[test]
    fn test_replace_open_content_only_touches_open_message() {
        let mut transcript = Transcript::new();
        let message = Message::streaming("Hel");
        let id = message.id.clone();
        transcript.push(message);

        assert!(transcript.replace_open_content(&id, "Hello"));
        assert_eq!(transcript.get(&id).unwrap().content, "Hello");

        assert!(transcript.close(&id));
        assert!(!transcript.replace_open_content(&id, "Hello again"));
        assert_eq!(transcript.get(&id).unwrap().content, "Hello");
    }

    #[test]
    fn test_replace_open_content_missing_id() {
        let mut transcript = Transcript::new();
        assert!(!transcript.replace_open_content(&MessageId::stream(), "x"));
    }

    #[test]
    fn test_close_open_returns_id() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.close_open(), None);

        let message = Message::streaming("x");
        let id = message.id.clone();
        transcript.push(message);
        transcript.push(Message::user("interleaved"));

        assert_eq!(transcript.open_message().map(|m| m.id.clone()), Some(id.clone()));
        assert_eq!(transcript.close_open(), Some(id));
        assert!(transcript.open_message().is_none());
    }

    #[test]
    fn test_handle_clones_share_state() {
        let handle = TranscriptHandle::new();
        let other = handle.clone();
        other.push(Message::user("shared"));
        assert_eq!(handle.snapshot().len(), 1);
    }

    #[test]
    fn test_update_without_change_does_not_notify() {
        let handle = TranscriptHandle::new();
        let rx = handle.subscribe();
        assert!(!handle.update(|_| false));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_from_messages_keeps_order() {
        let transcript =
            Transcript::from_messages(vec![Message::user("q"), Message::assistant("a")]);
        let contents: Vec<_> = transcript.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q", "a"]);
    }
}
