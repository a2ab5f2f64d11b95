use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a stored conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// User-friendly title, replaced by the backend's `chat_title`
    pub title: String,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation last received a message or title
    pub updated_at: DateTime<Utc>,
    /// Number of persisted messages
    pub message_count: usize,
}

impl ConversationSummary {
    /// First eight characters of the id, as shown in listings
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Persisted token usage of one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Account identity
    pub identity: String,
    /// Total tokens consumed across all conversations
    pub total_tokens: u64,
    /// Number of turns recorded
    pub turns: u64,
}
