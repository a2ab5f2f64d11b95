//! Error types for Notestream
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Notestream operations
///
/// This enum covers the failures that can surface from configuration
/// loading, the question-answering backend, the realtime room channel,
/// and the conversation store. Framing and payload parse problems are
/// recovered inside the stream pipeline and never appear here.
#[derive(Error, Debug)]
pub enum NotestreamError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failures talking to the backend (connection refused,
    /// non-2xx status, aborted body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// No chunk arrived within the configured idle interval
    #[error("Stream timed out after {seconds}s without data")]
    Timeout {
        /// The idle interval that elapsed
        seconds: u64,
    },

    /// The submitted query was empty or whitespace only
    #[error("Query cannot be empty")]
    EmptyQuery,

    /// A turn is already in flight for this conversation
    #[error("A response is already streaming for conversation {0}")]
    SessionBusy(String),

    /// The conversation is not known to the controller
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    /// Token quota exhausted; the conversation is blocked
    #[error("Token quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Realtime channel errors (subscribe, track, broadcast)
    #[error("Realtime channel error: {0}")]
    Channel(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl NotestreamError {
    /// Returns true when the error is a quota failure, looking through an
    /// `anyhow::Error` wrapper.
    pub fn is_quota_exceeded(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<NotestreamError>(),
            Some(NotestreamError::QuotaExceeded(_))
        )
    }
}

/// Result type alias for Notestream operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
