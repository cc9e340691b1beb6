//! Streaming chat client for chatstream.
//!
//! This crate turns the backend's event-stream answers into handler callbacks:
//!
//! - [`FrameDecoder`] reassembles frames from arbitrarily split byte chunks
//! - [`dispatch()`] maps each frame to one [`EventHandler`] callback
//! - [`StreamController`] runs one operation at a time with bounded retry,
//!   exponential backoff, and silent cancellation
//! - [`SessionClient`] lists, reads, and deletes stored conversations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  start/abort  ┌──────────────────┐  POST  ┌─────────────────────┐
//! │ ChatClient / │──────────────▶│ StreamController │───────▶│ AuthenticatedClient │
//! │ caller       │               │ (retry, cancel)  │        └─────────────────────┘
//! └──────▲───────┘               └────────┬─────────┘
//!        │                                │ byte chunks
//!        │ callbacks             ┌────────▼─────────┐  frames  ┌──────────────┐
//!        └───────────────────────│ EventHandler     │◀─────────│ FrameDecoder │
//!                                │ (via dispatch)   │          └──────────────┘
//!                                └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chatstream_auth::MemoryCredentialStore;
//! use chatstream_client::{ChatClient, ClientConfig};
//! use chatstream_core::{ChatEvent, ChatRequest, UserId};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("http://localhost:8000");
//! let client = ChatClient::new(config, Arc::new(MemoryCredentialStore::new()))?;
//!
//! let user_id = UserId::new("user-42")?;
//! client.enroll(&user_id, &CancellationToken::new()).await;
//!
//! let mut events: Vec<ChatEvent> = Vec::new();
//! client
//!     .ask(&ChatRequest::new(user_id, "Which shoes fit wide feet?"), &mut events)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod controller;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod retry;
pub mod sessions;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chatstream_auth::{AuthenticatedClient, CredentialStore, ReqwestTransport, Transport};
use chatstream_core::{ChatRequest, UserId};

pub use config::{ClientConfig, ConfigError};
pub use controller::{StreamController, StreamRequest};
pub use decoder::{EventFrame, FrameDecoder, UNKNOWN_EVENT_TYPE};
pub use dispatch::{dispatch, dispatch_frame, strip_tip_blocks, ChannelHandler, EventHandler};
pub use error::{Result, StreamError};
pub use retry::{RetryPolicy, Retryability};
pub use sessions::{HistoryMessage, SessionClient, SessionSummary};

/// Everything a chat front end needs, wired from one [`ClientConfig`].
pub struct ChatClient {
    config: ClientConfig,
    controller: StreamController,
    sessions: SessionClient,
}

impl ChatClient {
    /// Create a client backed by a `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.connect_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport), store))
    }

    /// Create a client over an arbitrary transport.
    #[must_use]
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let auth = AuthenticatedClient::new(config.auth_config(), transport, store);
        let controller = StreamController::new(auth.clone())
            .with_policy(config.retry_policy())
            .with_read_idle_timeout(config.read_idle_timeout());
        let sessions = SessionClient::new(auth);

        Self {
            config,
            controller,
            sessions,
        }
    }

    /// The configuration this client was built from.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The authenticated client shared by streaming and session calls.
    #[must_use]
    pub const fn auth(&self) -> &AuthenticatedClient {
        self.controller.client()
    }

    /// The stream controller.
    #[must_use]
    pub const fn controller(&self) -> &StreamController {
        &self.controller
    }

    /// The session client.
    #[must_use]
    pub const fn sessions(&self) -> &SessionClient {
        &self.sessions
    }

    /// Make sure an API key is stored for `user_id`. Never fails.
    pub async fn enroll(&self, user_id: &UserId, cancel: &CancellationToken) {
        self.auth().credentials().enroll(user_id, cancel).await;
    }

    /// Ask a question and stream the answer to `handler`.
    ///
    /// # Errors
    ///
    /// See [`StreamController::start`].
    pub async fn ask<H: EventHandler + ?Sized>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
    ) -> Result<()> {
        let payload = request.to_value()?;
        self.controller
            .start(StreamRequest::new(self.config.stream_url(), payload), handler)
            .await
    }

    /// Cancel the in-flight answer, if any.
    pub fn abort(&self) {
        self.controller.abort();
    }

    /// Returns `true` while an answer is streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.controller.is_streaming()
    }
}
