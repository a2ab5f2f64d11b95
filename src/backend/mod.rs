//! Question-answering backend abstraction
//!
//! The backend is a black box: it accepts one request per user turn and
//! answers with a byte stream whose text is newline framed, payload lines
//! being prefixed with `data:`. Decoding that stream is the job of
//! [`crate::stream`]; this module only moves bytes.
//!
//! - [`http::HttpBackend`] -- POSTs the request with `reqwest` and streams
//!   the response body.
//! - [`fake::FakeBackend`] -- scripted in-process backend used in tests
//!   (cfg(test) only).

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Body of one outbound submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Identity of the asking user
    pub user_id: String,
    /// The question text
    pub query: String,
    /// Conversation the question belongs to
    pub chat_id: String,
}

/// Response body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Abstraction over question-answering backends
///
/// Implementations must send exactly one request per call. A returned
/// stream means the backend accepted the request; transport failures
/// before that point are returned as errors.
#[async_trait::async_trait]
pub trait QaBackend: Send + Sync + std::fmt::Debug {
    /// Submit one question and return the streamed response body.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::NotestreamError::Transport`] when the request
    /// cannot be sent or the backend answers with a non-success status.
    async fn submit(&self, request: &SubmitRequest) -> Result<ByteStream>;
}

pub mod http;

#[cfg(test)]
pub mod fake;
