//! Applies stream events to a transcript
//!
//! One [`TranscriptAssembler`] lives for one stream session. It remembers
//! which assistant message the session opened and the text accumulated so
//! far, so a turn produces exactly one assistant message however many
//! deltas arrive, even when peer messages are appended in between.
//!
//! The assembler never talks to storage. Title and usage updates carried by
//! a `complete` event are handed back as [`Finalization`]s for the session
//! controller to persist.

use crate::stream::{StreamEvent, TokenUsage};
use crate::transcript::{Message, MessageId, Transcript};

/// Prefix of the assistant notice shown when a turn fails
pub const FAILURE_NOTICE: &str = "Sorry, there was an error processing your message";

/// Side effect requested by a `complete` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// Persist a new conversation title
    UpdateTitle(String),
    /// Account the turn's token usage
    RecordUsage(TokenUsage),
}

/// Per-session event reducer
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    open: Option<MessageId>,
    current: String,
    produced: Vec<MessageId>,
}

impl TranscriptAssembler {
    /// Creates an assembler with no open message
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event, returning the side effects it requests.
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::stream::StreamEvent;
    /// use notestream::transcript::{Transcript, TranscriptAssembler};
    ///
    /// let mut transcript = Transcript::new();
    /// let mut assembler = TranscriptAssembler::new();
    /// for delta in ["Hel", "lo"] {
    ///     assembler.apply(&mut transcript, StreamEvent::Content { delta: delta.into() });
    /// }
    /// assembler.apply(&mut transcript, StreamEvent::Complete { title: None, usage: None });
    ///
    /// assert_eq!(transcript.len(), 1);
    /// assert_eq!(transcript.messages()[0].content, "Hello");
    /// assert!(!transcript.messages()[0].is_open());
    /// ```
    pub fn apply(&mut self, transcript: &mut Transcript, event: StreamEvent) -> Vec<Finalization> {
        match event {
            StreamEvent::Content { delta } => {
                self.append(transcript, &delta);
                Vec::new()
            }
            StreamEvent::Complete { title, usage } => {
                self.close(transcript);
                let mut effects = Vec::new();
                if let Some(title) = title {
                    effects.push(Finalization::UpdateTitle(title));
                }
                if let Some(usage) = usage {
                    effects.push(Finalization::RecordUsage(usage));
                }
                effects
            }
            StreamEvent::Error { message } => {
                self.fail(transcript, &message);
                Vec::new()
            }
            StreamEvent::Ignored { .. } => Vec::new(),
        }
    }

    /// Close the open message, keeping its partial content, and append a
    /// failure notice.
    pub fn fail(&mut self, transcript: &mut Transcript, detail: &str) {
        self.close(transcript);
        let notice = if detail.trim().is_empty() {
            format!("{}.", FAILURE_NOTICE)
        } else {
            format!("{}: {}", FAILURE_NOTICE, detail.trim())
        };
        transcript.push(Message::assistant(notice));
    }

    /// Close the open message, if any. Later deltas open a new message.
    pub fn close(&mut self, transcript: &mut Transcript) -> Option<MessageId> {
        let id = self.open.take()?;
        self.current.clear();
        transcript.close(&id);
        Some(id)
    }

    /// Id of the message currently receiving deltas
    pub fn open_message_id(&self) -> Option<&MessageId> {
        self.open.as_ref()
    }

    /// Ids of every assistant message this session opened, in order
    pub fn produced(&self) -> &[MessageId] {
        &self.produced
    }

    fn append(&mut self, transcript: &mut Transcript, delta: &str) {
        if let Some(id) = &self.open {
            let mut next = String::with_capacity(self.current.len() + delta.len());
            next.push_str(&self.current);
            next.push_str(delta);
            if transcript.replace_open_content(id, &next) {
                self.current = next;
                return;
            }
            tracing::debug!("Open message {} is gone; starting a new one", id);
        }

        let message = Message::streaming(delta);
        self.current = delta.to_string();
        self.open = Some(message.id.clone());
        self.produced.push(message.id.clone());
        transcript.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{MessageOrigin, Role};

    fn content(delta: &str) -> StreamEvent {
        StreamEvent::Content {
            delta: delta.to_string(),
        }
    }

    fn complete() -> StreamEvent {
        StreamEvent::Complete {
            title: None,
            usage: None,
        }
    }

    #[test]
    fn test_deltas_build_one_message() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("question"));
        let mut assembler = TranscriptAssembler::new();

        let deltas = ["The ", "mito", "chondria ", "is ", "the powerhouse"];
        for d in deltas {
            assembler.apply(&mut transcript, content(d));
        }

        assert_eq!(transcript.len(), 2);
        let reply = transcript.last().unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.origin, MessageOrigin::Stream);
        assert_eq!(reply.content, deltas.concat());
        assert!(reply.is_open());
        assert_eq!(assembler.produced().len(), 1);
    }

    #[test]
    fn test_complete_closes_and_late_delta_opens_new_message() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();

        assembler.apply(&mut transcript, content("first"));
        assembler.apply(&mut transcript, complete());
        assert!(assembler.open_message_id().is_none());

        assembler.apply(&mut transcript, content("late"));

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "first");
        assert!(!transcript.messages()[0].is_open());
        assert_eq!(transcript.messages()[1].content, "late");
        assert!(transcript.messages()[1].is_open());
        assert_ne!(transcript.messages()[0].id, transcript.messages()[1].id);
        assert_eq!(assembler.produced().len(), 2);
    }

    #[test]
    fn test_complete_returns_finalizations() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();
        assembler.apply(&mut transcript, content("x"));

        let effects = assembler.apply(
            &mut transcript,
            StreamEvent::Complete {
                title: Some("Cells".to_string()),
                usage: Some(TokenUsage::new(10, 5)),
            },
        );

        assert_eq!(
            effects,
            vec![
                Finalization::UpdateTitle("Cells".to_string()),
                Finalization::RecordUsage(TokenUsage::new(10, 5)),
            ]
        );
    }

    #[test]
    fn test_interleaved_peer_message_does_not_split_turn() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();

        assembler.apply(&mut transcript, content("Hel"));
        transcript.push(Message::user("peer chatter"));
        assembler.apply(&mut transcript, content("lo"));

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "Hello");
        assert_eq!(transcript.messages()[1].content, "peer chatter");
    }

    #[test]
    fn test_error_keeps_partial_and_appends_notice() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();

        assembler.apply(&mut transcript, content("partial ans"));
        assembler.apply(
            &mut transcript,
            StreamEvent::Error {
                message: "model overloaded".to_string(),
            },
        );

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "partial ans");
        assert!(!transcript.messages()[0].is_open());
        let notice = &transcript.messages()[1];
        assert_eq!(notice.role, Role::Assistant);
        assert_eq!(
            notice.content,
            "Sorry, there was an error processing your message: model overloaded"
        );
        assert!(transcript.open_message().is_none());
    }

    #[test]
    fn test_fail_without_detail() {
        let mut transcript = Transcript::new();
        TranscriptAssembler::new().fail(&mut transcript, "  ");
        assert_eq!(
            transcript.last().unwrap().content,
            "Sorry, there was an error processing your message."
        );
    }

    #[test]
    fn test_ignored_event_changes_nothing() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();
        let effects = assembler.apply(
            &mut transcript,
            StreamEvent::Ignored {
                kind: "sources".to_string(),
            },
        );
        assert!(effects.is_empty());
        assert!(transcript.is_empty());
    }

    #[test]
    fn test_externally_closed_message_is_not_mutated() {
        let mut transcript = Transcript::new();
        let mut assembler = TranscriptAssembler::new();

        assembler.apply(&mut transcript, content("a"));
        transcript.close_open();
        assembler.apply(&mut transcript, content("b"));

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].content, "a");
        assert_eq!(transcript.messages()[1].content, "b");
    }
}
