//! The stream controller: one logical "ask and stream the answer" operation
//! at a time, with bounded retry and cancellation at every suspension point.
//!
//! ```text
//! Idle ──start──▶ Connecting ──2xx──▶ Streaming ──done/eof──▶ Done
//!                    │  ▲                 │
//!          transient │  │ backoff         │ transient
//!                    ▼  │                 ▼
//!                  Retrying ◀─────────────┘
//!
//! any state ──abort / new start──▶ Aborted     fatal / exhausted ──▶ Failed
//! ```
//!
//! Cancellation is silent: [`StreamController::start`] resolves `Ok(())`
//! when the operation is aborted, superseded, or its parent token fires.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderValue, ACCEPT};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use chatstream_auth::{AuthenticatedClient, ByteStream, HttpRequest};

use crate::decoder::FrameDecoder;
use crate::dispatch::{dispatch_frame, EventHandler};
use crate::error::{Result, StreamError};
use crate::retry::{RetryPolicy, Retryability};

const DONE_EVENT: &str = "done";
const EVENT_STREAM: &str = "text/event-stream";

/// One streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Absolute URL of the streaming endpoint.
    pub endpoint: String,
    /// JSON body posted on every attempt.
    pub payload: Value,
    /// Optional outer token. Cancelling it cancels the operation.
    pub cancel: Option<CancellationToken>,
}

impl StreamRequest {
    /// Create a request with no parent token.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
            cancel: None,
        }
    }

    /// Tie the operation to an outer cancellation token.
    #[must_use]
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.cancel = Some(parent);
        self
    }
}

struct ActiveStream {
    generation: u64,
    token: CancellationToken,
}

/// Drives streaming operations over an [`AuthenticatedClient`].
///
/// Share it behind an `Arc` to call [`abort`](Self::abort) from another task
/// while [`start`](Self::start) is running.
pub struct StreamController {
    client: AuthenticatedClient,
    policy: RetryPolicy,
    read_idle_timeout: Option<Duration>,
    active: Mutex<Option<ActiveStream>>,
    generation: AtomicU64,
    streaming: AtomicBool,
}

impl StreamController {
    /// Create a controller with the default retry policy and no read idle timeout.
    #[must_use]
    pub fn new(client: AuthenticatedClient) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            read_idle_timeout: None,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            streaming: AtomicBool::new(false),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fail an attempt as [`StreamError::Stalled`] when response headers, an
    /// error body, or the next chunk take longer than `timeout`. `None` waits
    /// forever.
    #[must_use]
    pub fn with_read_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_idle_timeout = timeout;
        self
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The underlying authenticated client.
    #[must_use]
    pub const fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// Returns `true` while an operation is in flight and not aborted.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight operation, if any.
    ///
    /// The streaming flag clears immediately; the operation itself settles
    /// once it observes the cancellation.
    pub fn abort(&self) {
        let mut active = self.active.lock();
        if let Some(stream) = active.take() {
            tracing::debug!(generation = stream.generation, "Aborting stream");
            stream.token.cancel();
        }
        self.streaming.store(false, Ordering::SeqCst);
    }

    /// Run one streaming operation to completion, dispatching frames to `handler`.
    ///
    /// Cancels any previous operation first. `handler.on_stream_end` is
    /// called exactly once before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error when it is not retryable or the
    /// attempt ceiling is reached. Cancellation is not an error.
    pub async fn start<H: EventHandler + ?Sized>(
        &self,
        request: StreamRequest,
        handler: &mut H,
    ) -> Result<()> {
        let (generation, token) = self.begin(request.cancel.as_ref());
        tracing::debug!(generation, endpoint = %request.endpoint, "Starting stream");

        let result = self.run(&request, &token, handler).await;

        self.finish(generation);
        handler.on_stream_end();

        match result {
            Err(_) if token.is_cancelled() => {
                tracing::debug!(generation, "Stream cancelled");
                Ok(())
            }
            Err(StreamError::Cancelled) => Ok(()),
            other => other,
        }
    }

    fn begin(&self, parent: Option<&CancellationToken>) -> (u64, CancellationToken) {
        let token = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut active = self.active.lock();
        if let Some(previous) = active.replace(ActiveStream {
            generation,
            token: token.clone(),
        }) {
            tracing::debug!(
                superseded = previous.generation,
                generation,
                "Cancelling previous stream"
            );
            previous.token.cancel();
        }
        self.streaming.store(true, Ordering::SeqCst);

        (generation, token)
    }

    /// Clear bookkeeping unless a newer operation has taken over.
    fn finish(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            *active = None;
            self.streaming.store(false, Ordering::SeqCst);
        }
    }

    async fn run<H: EventHandler + ?Sized>(
        &self,
        request: &StreamRequest,
        token: &CancellationToken,
        handler: &mut H,
    ) -> Result<()> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.attempt(request, token, handler).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if err.is_cancelled() || token.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            if attempt >= max_attempts || self.policy.classify(&err) == Retryability::Fatal {
                tracing::warn!(attempt, max_attempts, error = %err, "Stream failed");
                return Err(err);
            }

            let delay = self.policy.backoff_delay(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Stream attempt failed, reconnecting"
            );
            handler.on_reconnecting(attempt, max_attempts);

            tokio::select! {
                biased;
                () = token.cancelled() => return Err(StreamError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt<H: EventHandler + ?Sized>(
        &self,
        request: &StreamRequest,
        token: &CancellationToken,
        handler: &mut H,
    ) -> Result<()> {
        let http = HttpRequest::post(request.endpoint.clone())
            .json(request.payload.clone())
            .header(ACCEPT, HeaderValue::from_static(EVENT_STREAM));

        let response = self.within_idle(self.client.request(http, token)).await??;
        if !response.status().is_success() {
            let err = tokio::select! {
                biased;
                () = token.cancelled() => StreamError::Cancelled,
                err = StreamError::from_response_within(response, self.read_idle_timeout) => err,
            };
            return Err(err);
        }

        let mut body = response.into_byte_stream();
        let mut decoder = FrameDecoder::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = token.cancelled() => return Err(StreamError::Cancelled),
                chunk = self.next_chunk(&mut body) => chunk?,
            };

            let finished = chunk.is_none();
            let frames = decoder.feed(chunk.as_deref(), finished);

            for frame in frames {
                if token.is_cancelled() {
                    return Err(StreamError::Cancelled);
                }
                if !dispatch_frame(&frame, handler) {
                    tracing::debug!(event_type = %frame.event_type, "Frame not handled");
                }
                if frame.event_type == DONE_EVENT {
                    // Dropping the body closes the connection.
                    return Ok(());
                }
            }

            if finished {
                return Ok(());
            }
        }
    }

    async fn next_chunk(&self, body: &mut ByteStream) -> Result<Option<Bytes>> {
        let next = self.within_idle(body.next()).await?;
        next.transpose().map_err(StreamError::from)
    }

    /// Bound `fut` by the read idle timeout, failing as [`StreamError::Stalled`].
    async fn within_idle<F: Future>(&self, fut: F) -> Result<F::Output> {
        match self.read_idle_timeout {
            Some(idle) => tokio::time::timeout(idle, fut)
                .await
                .map_err(|_| StreamError::Stalled(idle)),
            None => Ok(fut.await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chatstream_auth::{AuthConfig, MemoryCredentialStore, MockReply, MockTransport};
    use chatstream_core::ChatEvent;
    use serde_json::json;

    fn controller(replies: impl IntoIterator<Item = MockReply>) -> (StreamController, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::with_replies(replies));
        let client = AuthenticatedClient::new(
            AuthConfig::new("http://backend"),
            transport.clone(),
            Arc::new(MemoryCredentialStore::with_key("k1")),
        );
        (StreamController::new(client), transport)
    }

    fn request() -> StreamRequest {
        StreamRequest::new("http://backend/chat/stream", json!({"message": "hi"}))
    }

    #[tokio::test]
    async fn posts_with_event_stream_accept() {
        let (controller, transport) = controller([
            MockReply::json(200, &json!({"csrf_token": "t"})),
            MockReply::event_stream(["data: {\"type\":\"done\"}\n\n"]),
        ]);

        let mut events = Vec::new();
        controller.start(request(), &mut events).await.unwrap();

        let sent = &transport.requests()[1];
        assert_eq!(sent.headers.get(ACCEPT).unwrap(), EVENT_STREAM);
        assert_eq!(sent.body, Some(json!({"message": "hi"})));
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn abort_without_stream_is_harmless() {
        let (controller, _) = controller([]);
        controller.abort();
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn frames_after_done_are_ignored() {
        let (controller, _) = controller([
            MockReply::json(200, &json!({"csrf_token": "t"})),
            MockReply::event_stream([
                "data: {\"type\":\"done\",\"session_id\":\"S1\"}\n\n",
                "data: {\"type\":\"text\",\"content\":\"late\"}\n\n",
            ]),
        ]);

        let mut events = Vec::new();
        controller.start(request(), &mut events).await.unwrap();

        assert_eq!(
            events,
            vec![
                ChatEvent::Done {
                    session_id: Some("S1".into())
                },
                ChatEvent::StreamEnd,
            ]
        );
    }

    #[tokio::test]
    async fn parent_cancellation_is_silent() {
        let (controller, transport) = controller([]);
        let parent = CancellationToken::new();
        parent.cancel();

        let mut events = Vec::new();
        controller
            .start(request().with_parent(parent), &mut events)
            .await
            .unwrap();

        assert_eq!(events, vec![ChatEvent::StreamEnd]);
        assert_eq!(transport.call_count(), 0);
    }
}
