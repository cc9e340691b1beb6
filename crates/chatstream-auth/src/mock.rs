//! Scripted transport for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::transport::{ByteStream, HttpRequest, HttpResponse, Transport};

/// One scripted outcome of [`MockTransport::send`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with a status and a body delivered in the given chunks.
    Response {
        /// HTTP status.
        status: u16,
        /// Response headers.
        headers: HeaderMap,
        /// Body chunks, delivered in order.
        chunks: Vec<Bytes>,
        /// Error delivered after the chunks instead of ending the body.
        body_error: Option<String>,
        /// Keep the body open forever after the chunks.
        stall: bool,
    },
    /// Fail as if the connection could not be made.
    NetworkError(String),
    /// Never answer; resolves only when the request is cancelled.
    Hang,
}

impl MockReply {
    /// An empty-bodied response.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::chunks(status, Vec::<Bytes>::new())
    }

    /// A JSON response.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::Response {
            status,
            headers,
            chunks: vec![Bytes::from(body.to_string())],
            body_error: None,
            stall: false,
        }
    }

    /// A response whose body arrives in the given chunks.
    #[must_use]
    pub fn chunks<I, B>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::Response {
            status,
            headers: HeaderMap::new(),
            chunks: chunks.into_iter().map(Into::into).collect(),
            body_error: None,
            stall: false,
        }
    }

    /// An event-stream response whose body arrives in the given chunks.
    #[must_use]
    pub fn event_stream<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let mut reply = Self::chunks(200, chunks);
        if let Self::Response { headers, .. } = &mut reply {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        }
        reply
    }

    /// Keep the body open after the scripted chunks.
    #[must_use]
    pub fn stalled(mut self) -> Self {
        if let Self::Response { stall, .. } = &mut self {
            *stall = true;
        }
        self
    }

    /// Break the body with a read error after the scripted chunks.
    #[must_use]
    pub fn broken(mut self, message: impl Into<String>) -> Self {
        if let Self::Response { body_error, .. } = &mut self {
            *body_error = Some(message.into());
        }
        self
    }

    /// A connection failure.
    #[must_use]
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError(message.into())
    }
}

/// A transport that replays scripted replies and records every request.
///
/// Requests beyond the script fail with a network error.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Create a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that answers with `replies` in order.
    #[must_use]
    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Append a reply to the script.
    pub fn push(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests sent so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of scripted replies not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front();

        match reply {
            None => Err(TransportError::Network("no scripted reply".to_string())),
            Some(MockReply::NetworkError(message)) => Err(TransportError::Network(message)),
            Some(MockReply::Hang) => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
            Some(MockReply::Response {
                status,
                headers,
                chunks,
                body_error,
                stall,
            }) => {
                let status = StatusCode::from_u16(status)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;

                let chunks = stream::iter(chunks.into_iter().map(Ok));
                let tail = stream::iter(body_error.map(|m| Err(TransportError::Body(m))));
                let body: ByteStream = if stall {
                    Box::pin(chunks.chain(tail).chain(stream::pending()))
                } else {
                    Box::pin(chunks.chain(tail))
                };

                Ok(HttpResponse::new(status, headers, body))
            }
        }
    }
}
