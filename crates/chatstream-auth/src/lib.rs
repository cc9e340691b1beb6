//! Credentials and authenticated transport for chatstream.
//!
//! This crate provides everything between the streaming client and the wire:
//!
//! - A [`Transport`] seam with a `reqwest` implementation (cookie store on)
//! - Credential storage for the API key, CSRF token, and user ID
//! - Best-effort enrollment and CSRF token fetching
//! - [`AuthenticatedClient`], which injects credentials and recovers once from
//!   stale keys (401) and expired CSRF tokens (403)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ Stream controller /  │────▶│ AuthenticatedClient  │
//! │ session client       │     │ (headers + recovery) │
//! └──────────────────────┘     └──────────┬───────────┘
//!                                         │
//!                  ┌──────────────────────┼──────────────────────┐
//!                  │                      │                      │
//!         ┌────────▼─────────┐  ┌─────────▼────────┐  ┌──────────▼─────────┐
//!         │ CredentialClient │  │ CredentialStore  │  │ Transport          │
//!         │ (enroll, CSRF)   │  │ (key, token)     │  │ (reqwest / mock)   │
//!         └──────────────────┘  └──────────────────┘  └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chatstream_auth::{
//!     AuthConfig, AuthenticatedClient, HttpRequest, MemoryCredentialStore, ReqwestTransport,
//! };
//! use chatstream_core::UserId;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(10))?);
//! let store = Arc::new(MemoryCredentialStore::new());
//! let client = AuthenticatedClient::new(AuthConfig::new("http://localhost:8000"), transport, store);
//!
//! let cancel = CancellationToken::new();
//! client.credentials().enroll(&UserId::new("user-42")?, &cancel).await;
//!
//! let response = client
//!     .request(HttpRequest::get("http://localhost:8000/sessions/user-42"), &cancel)
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::time::Duration;

pub mod credentials;
pub mod error;
pub mod fetch;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod store;
pub mod transport;

pub use credentials::{CredentialClient, EnrollResponse};
pub use error::{AuthError, Result, TransportError};
pub use fetch::{AuthenticatedClient, API_KEY_HEADER, CSRF_TOKEN_HEADER};
pub use store::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use transport::{ByteStream, HttpRequest, HttpResponse, ReqwestTransport, Transport};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockReply, MockTransport};

/// Configuration for talking to the chat backend's auth endpoints.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the backend (e.g., `http://localhost:8000`), without trailing slash.
    pub base_url: String,
    /// Fetch a CSRF token before the first state-changing request.
    pub csrf_preflight: bool,
    /// Upper bound on reading a rejection body while deciding how to recover.
    /// `None` waits forever.
    pub body_read_timeout: Option<Duration>,
}

impl AuthConfig {
    /// Default bound on reading a rejection body.
    pub const DEFAULT_BODY_READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a configuration for `base_url` with CSRF pre-flight enabled.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            csrf_preflight: true,
            body_read_timeout: Some(Self::DEFAULT_BODY_READ_TIMEOUT),
        }
    }

    /// Get the enrollment endpoint URL.
    #[must_use]
    pub fn enroll_url(&self) -> String {
        format!("{}/auth/key", self.base_url)
    }

    /// Get the CSRF token endpoint URL.
    #[must_use]
    pub fn csrf_url(&self) -> String {
        format!("{}/csrf-token", self.base_url)
    }
}
