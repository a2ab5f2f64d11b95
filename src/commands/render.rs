//! Terminal rendering of transcripts
//!
//! [`TranscriptPrinter`] follows a transcript while a turn streams and
//! writes only what is new since the last render, so the answer appears
//! incrementally. [`format_message`] renders one finished message for
//! listings such as `history show`.

use std::collections::HashMap;
use std::io::{self, Write};

use colored::Colorize;

use crate::transcript::{Message, MessageId, MessageOrigin, Role, Transcript};

/// Incremental writer for a live transcript
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    baseline: usize,
    printed: HashMap<MessageId, Progress>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    bytes: usize,
    finished: bool,
}

impl TranscriptPrinter {
    /// Printer that ignores everything already in `transcript`
    pub fn starting_after(transcript: &Transcript) -> Self {
        Self {
            baseline: transcript.len(),
            printed: HashMap::new(),
        }
    }

    /// Write whatever changed since the previous call.
    ///
    /// The user's own local messages are skipped; the prompt already shows
    /// them. Assistant text is written as it grows and terminated with a
    /// newline once the message closes.
    pub fn render<W: Write>(&mut self, transcript: &Transcript, out: &mut W) -> io::Result<()> {
        for message in transcript.messages().iter().skip(self.baseline) {
            if message.role == Role::User && message.origin == MessageOrigin::Local {
                continue;
            }
            let progress = self.printed.entry(message.id.clone()).or_default();
            if progress.finished {
                continue;
            }

            if let MessageOrigin::Peer { .. } = message.origin {
                writeln!(out, "{}", format_message(message))?;
                progress.finished = true;
                continue;
            }

            match message.content.get(progress.bytes..) {
                Some(delta) => write!(out, "{}", delta)?,
                // Content no longer extends what was written; start over.
                None => write!(out, "\n{}", message.content)?,
            }
            progress.bytes = message.content.len();

            if !message.is_open() {
                writeln!(out)?;
                progress.finished = true;
            }
        }
        out.flush()
    }
}

/// One message as a single display line
pub fn format_message(message: &Message) -> String {
    let label = match (&message.origin, message.role) {
        (MessageOrigin::Peer { user_name, .. }, _) => {
            let name = if user_name.is_empty() { "peer" } else { user_name };
            format!("[{}]", name).magenta().to_string()
        }
        (_, Role::User) => "you".green().bold().to_string(),
        (_, Role::Assistant) => "assistant".cyan().bold().to_string(),
    };
    format!(
        "{} {} {}",
        message.created_at.format("%H:%M").to_string().dimmed(),
        label,
        message.content
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::PeerMessage;

    fn render(printer: &mut TranscriptPrinter, transcript: &Transcript) -> String {
        let mut out = Vec::new();
        printer.render(transcript, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_streams_only_new_text() {
        let mut transcript = Transcript::from_messages(vec![Message::assistant("greeting")]);
        let mut printer = TranscriptPrinter::starting_after(&transcript);

        transcript.push(Message::user("question"));
        let open = Message::streaming("Hel");
        let id = open.id.clone();
        transcript.push(open);
        assert_eq!(render(&mut printer, &transcript), "Hel");

        transcript.replace_open_content(&id, "Hello");
        assert_eq!(render(&mut printer, &transcript), "lo");

        transcript.close(&id);
        assert_eq!(render(&mut printer, &transcript), "\n");
        assert_eq!(render(&mut printer, &transcript), "");
    }

    #[test]
    fn test_closed_notice_is_printed_once() {
        let mut transcript = Transcript::new();
        let mut printer = TranscriptPrinter::starting_after(&transcript);
        transcript.push(Message::assistant("Sorry"));

        assert_eq!(render(&mut printer, &transcript), "Sorry\n");
        assert_eq!(render(&mut printer, &transcript), "");
    }

    #[test]
    fn test_peer_message_includes_sender() {
        let mut transcript = Transcript::new();
        let mut printer = TranscriptPrinter::starting_after(&transcript);
        transcript.push(Message::peer(
            "room_one",
            &PeerMessage {
                message: "anyone here?".to_string(),
                user_name: "bob".to_string(),
                avatar: None,
                timestamp: "2024-05-01T10:00:00Z".to_string(),
            },
        ));

        let output = render(&mut printer, &transcript);
        assert!(output.contains("bob"));
        assert!(output.contains("anyone here?"));
    }

    #[test]
    fn test_format_message_contains_content() {
        let line = format_message(&Message::user("What is osmosis?"));
        assert!(line.contains("What is osmosis?"));
        assert!(line.contains("you"));
    }
}
