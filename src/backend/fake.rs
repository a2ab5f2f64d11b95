//! In-process scripted backend for unit tests
//!
//! [`FakeBackend`] answers each `submit` with the next scripted reply:
//!
//! - [`FakeBackend::push_chunks`] -- a body made of fixed chunks that ends
//!   when the chunks run out.
//! - [`FakeBackend::push_channel`] -- a body fed from an unbounded channel;
//!   the test keeps the sender and decides when chunks arrive and when the
//!   body ends (drop the sender).
//! - [`FakeBackend::push_failure`] -- the request itself fails with a
//!   transport error.
//! - [`FakeBackend::push_stall`] -- the request is accepted but no response
//!   ever arrives.
//!
//! Every request is recorded and can be inspected with
//! [`FakeBackend::requests`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::backend::{ByteStream, QaBackend, SubmitRequest};
use crate::error::{NotestreamError, Result};

enum Reply {
    Chunks(Vec<Bytes>),
    Channel(mpsc::UnboundedReceiver<Result<Bytes>>),
    Failure(String),
    Stall,
}

/// Scripted backend
#[derive(Clone, Default)]
pub struct FakeBackend {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<SubmitRequest>>>,
}

impl std::fmt::Debug for FakeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeBackend")
            .field("requests", &self.requests.lock().unwrap().len())
            .finish()
    }
}

impl FakeBackend {
    /// Creates a backend with no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a body made of the given chunks
    pub fn push_chunks<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks = chunks.into_iter().map(Into::into).collect();
        self.replies.lock().unwrap().push_back(Reply::Chunks(chunks));
    }

    /// Script a body fed from a channel and return its sender
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.replies.lock().unwrap().push_back(Reply::Channel(rx));
        tx
    }

    /// Script a failed request
    pub fn push_failure(&self, reason: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Failure(reason.to_string()));
    }

    /// Script a request that never gets a response
    pub fn push_stall(&self) {
        self.replies.lock().unwrap().push_back(Reply::Stall);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<SubmitRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QaBackend for FakeBackend {
    async fn submit(&self, request: &SubmitRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Chunks(chunks)) => Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok)))),
            Some(Reply::Channel(rx)) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Some(Reply::Failure(reason)) => Err(NotestreamError::Transport(reason).into()),
            Some(Reply::Stall) => futures::future::pending().await,
            None => Err(NotestreamError::Transport("no scripted reply".to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> SubmitRequest {
        SubmitRequest {
            user_id: "u".to_string(),
            query: "q".to_string(),
            chat_id: "c".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replies_are_served_in_order() {
        let backend = FakeBackend::new();
        backend.push_chunks(["a", "b"]);
        backend.push_failure("down");

        let body: Vec<_> = backend.submit(&request()).await.unwrap().collect().await;
        assert_eq!(body.len(), 2);
        assert!(backend.submit(&request()).await.is_err());
        assert_eq!(backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_channel_body_ends_when_sender_dropped() {
        let backend = FakeBackend::new();
        let tx = backend.push_channel();
        let mut body = backend.submit(&request()).await.unwrap();

        tx.send(Ok(Bytes::from_static(b"x"))).unwrap();
        drop(tx);

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"x"));
        assert!(body.next().await.is_none());
    }
}
