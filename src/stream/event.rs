//! Typed stream events and the frame parser
//!
//! Payload-bearing frames look like
//!
//! ```text
//! data: {"event":"content","data":{"content":"Hel"}}
//! data: {"event":"complete","data":{"chat_title":"Greetings","token_usage":{"total_tokens":42}}}
//! ```
//!
//! Everything else on the wire (blank separator lines, SSE comments,
//! `event:` / `id:` fields) carries nothing for us and is dropped.

use serde::{Deserialize, Serialize};

/// Prefix marking a payload-bearing frame
pub const DATA_PREFIX: &str = "data:";

const DEFAULT_ERROR_MESSAGE: &str = "The assistant reported an error";

/// Token accounting reported by the backend on completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Number of tokens in the completion
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens used (prompt + completion)
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Creates a usage record, deriving the total
    ///
    /// # Examples
    ///
    /// ```
    /// use notestream::stream::TokenUsage;
    ///
    /// let usage = TokenUsage::new(100, 50);
    /// assert_eq!(usage.total_tokens, 150);
    /// ```
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One increment of backend output, decoded from one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A content delta for the current assistant turn
    Content {
        /// Text to append
        delta: String,
    },
    /// The turn finished
    Complete {
        /// Title the backend chose for the conversation
        title: Option<String>,
        /// Token usage for the turn
        usage: Option<TokenUsage>,
    },
    /// The backend reported a failure for this turn
    Error {
        /// Backend supplied description
        message: String,
    },
    /// A well-formed record with a discriminator we do not handle
    Ignored {
        /// The unrecognised `event` value, empty when absent
        kind: String,
    },
}

impl StreamEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &str {
        match self {
            Self::Content { .. } => "content",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Ignored { kind } => kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<WireData>,
}

#[derive(Debug, Default, Deserialize)]
struct WireData {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    chat_title: Option<String>,
    #[serde(default)]
    token_usage: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Read a non-negative token count, accepting integral floats
fn count(value: Option<&serde_json::Value>) -> Option<u64> {
    let value = value?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Lenient conversion of the `token_usage` member.
///
/// Members that are missing, null or not numeric count as zero; a bad
/// total is derived from the other two. Anything but an object is dropped.
fn usage_from_value(value: &serde_json::Value) -> Option<TokenUsage> {
    let Some(fields) = value.as_object() else {
        tracing::warn!(token_usage = %value, "Ignoring malformed token usage");
        return None;
    };
    let prompt_tokens = count(fields.get("prompt_tokens")).unwrap_or(0);
    let completion_tokens = count(fields.get("completion_tokens")).unwrap_or(0);
    let total_tokens = count(fields.get("total_tokens"))
        .unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens));
    Some(TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

/// Parse one frame into a [`StreamEvent`].
///
/// Returns `None` for frames without the `data:` prefix, for malformed
/// payloads (logged at warn level) and for `content` records without
/// content. Never fails.
///
/// # Examples
///
/// ```
/// use notestream::stream::{parse_frame, StreamEvent};
///
/// let event = parse_frame(r#"data: {"event":"content","data":{"content":"Hi"}}"#);
/// assert_eq!(event, Some(StreamEvent::Content { delta: "Hi".to_string() }));
/// assert_eq!(parse_frame(""), None);
/// assert_eq!(parse_frame("data: {not json}"), None);
/// ```
pub fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let payload = frame.trim().strip_prefix(DATA_PREFIX)?.trim();

    let record: WireRecord = match serde_json::from_str(payload) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(frame = %payload, "Failed to parse stream payload: {}", e);
            return None;
        }
    };

    let data = record.data.unwrap_or_default();
    match record.event.as_deref() {
        Some("content") => data
            .content
            .filter(|c| !c.is_empty())
            .map(|delta| StreamEvent::Content { delta }),
        Some("complete") => Some(StreamEvent::Complete {
            title: data.chat_title.filter(|t| !t.trim().is_empty()),
            usage: data.token_usage.as_ref().and_then(usage_from_value),
        }),
        Some("error") => Some(StreamEvent::Error {
            message: data
                .message
                .or(data.error)
                .or(data.content)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
        }),
        other => {
            let kind = other.unwrap_or_default().to_string();
            tracing::debug!("Ignoring stream event of kind '{}'", kind);
            Some(StreamEvent::Ignored { kind })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content() {
        let event = parse_frame(r#"data: {"event":"content","data":{"content":"Hello"}}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Content {
                delta: "Hello".to_string()
            })
        );
    }

    #[test]
    fn test_parse_tolerates_surrounding_whitespace() {
        let event = parse_frame("  data:{\"event\":\"content\",\"data\":{\"content\":\" x\"}}  ");
        assert_eq!(
            event,
            Some(StreamEvent::Content {
                delta: " x".to_string()
            })
        );
    }

    #[test]
    fn test_non_data_frames_are_dropped() {
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("   "), None);
        assert_eq!(parse_frame(": keep-alive"), None);
        assert_eq!(parse_frame("event: content"), None);
        assert_eq!(parse_frame("id: 7"), None);
    }

    #[test]
    fn test_malformed_payload_yields_none() {
        assert_eq!(parse_frame("data: {not json}"), None);
        assert_eq!(parse_frame("data:"), None);
        assert_eq!(parse_frame("data: [1,2"), None);
    }

    #[test]
    fn test_content_without_text_yields_none() {
        assert_eq!(parse_frame(r#"data: {"event":"content","data":{}}"#), None);
        assert_eq!(parse_frame(r#"data: {"event":"content"}"#), None);
        assert_eq!(
            parse_frame(r#"data: {"event":"content","data":{"content":""}}"#),
            None
        );
    }

    #[test]
    fn test_complete_without_data() {
        assert_eq!(
            parse_frame(r#"data: {"event":"complete"}"#),
            Some(StreamEvent::Complete {
                title: None,
                usage: None
            })
        );
    }

    #[test]
    fn test_complete_with_title_and_usage() {
        let event = parse_frame(
            r#"data: {"event":"complete","data":{"chat_title":"Photosynthesis","token_usage":{"total_tokens":321,"prompt_tokens":300}}}"#,
        );
        assert_eq!(
            event,
            Some(StreamEvent::Complete {
                title: Some("Photosynthesis".to_string()),
                usage: Some(TokenUsage {
                    prompt_tokens: 300,
                    completion_tokens: 0,
                    total_tokens: 321
                }),
            })
        );
    }

    #[test]
    fn test_bad_usage_member_keeps_complete_event() {
        let event = parse_frame(
            r#"data: {"event":"complete","data":{"chat_title":"Cells","token_usage":{"prompt_tokens":null,"completion_tokens":7,"total_tokens":"many"}}}"#,
        );
        assert_eq!(
            event,
            Some(StreamEvent::Complete {
                title: Some("Cells".to_string()),
                usage: Some(TokenUsage {
                    prompt_tokens: 0,
                    completion_tokens: 7,
                    total_tokens: 7,
                }),
            })
        );

        let event = parse_frame(
            r#"data: {"event":"complete","data":{"chat_title":"Cells","token_usage":{"total_tokens":12.0}}}"#,
        );
        assert!(matches!(
            event,
            Some(StreamEvent::Complete { usage: Some(u), .. }) if u.total_tokens == 12
        ));

        let event = parse_frame(
            r#"data: {"event":"complete","data":{"chat_title":"Cells","token_usage":"n/a"}}"#,
        );
        assert_eq!(
            event,
            Some(StreamEvent::Complete {
                title: Some("Cells".to_string()),
                usage: None,
            })
        );
    }

    #[test]
    fn test_complete_blank_title_dropped() {
        let event = parse_frame(r#"data: {"event":"complete","data":{"chat_title":"  "}}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Complete {
                title: None,
                usage: None
            })
        );
    }

    #[test]
    fn test_error_event_message_sources() {
        assert_eq!(
            parse_frame(r#"data: {"event":"error","data":{"message":"model overloaded"}}"#),
            Some(StreamEvent::Error {
                message: "model overloaded".to_string()
            })
        );
        assert_eq!(
            parse_frame(r#"data: {"event":"error","data":{"error":"bad key"}}"#),
            Some(StreamEvent::Error {
                message: "bad key".to_string()
            })
        );
        assert_eq!(
            parse_frame(r#"data: {"event":"error"}"#),
            Some(StreamEvent::Error {
                message: DEFAULT_ERROR_MESSAGE.to_string()
            })
        );
    }

    #[test]
    fn test_unknown_kind_is_ignored_variant() {
        let event = parse_frame(r#"data: {"event":"sources","data":{"ids":[1,2]}}"#);
        assert_eq!(
            event,
            Some(StreamEvent::Ignored {
                kind: "sources".to_string()
            })
        );
        assert_eq!(event.unwrap().kind(), "sources");
    }

    #[test]
    fn test_missing_discriminator_is_ignored_variant() {
        assert_eq!(
            parse_frame(r#"data: {"data":{"content":"x"}}"#),
            Some(StreamEvent::Ignored {
                kind: String::new()
            })
        );
    }

    #[test]
    fn test_null_data_is_tolerated() {
        assert_eq!(
            parse_frame(r#"data: {"event":"complete","data":null}"#),
            Some(StreamEvent::Complete {
                title: None,
                usage: None
            })
        );
    }
}
