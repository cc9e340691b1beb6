//! Error types for the streaming client.

use std::time::Duration;

use chatstream_auth::transport::collect_body_within;
use chatstream_auth::{HttpResponse, TransportError};
use bytes::Bytes;
use chatstream_core::{ApiErrorBody, CoreError};
use thiserror::Error;

/// A result type using `StreamError`.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that end a streaming operation or a session request.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The connection failed or broke mid-stream.
    #[error("network error: {0}")]
    Network(String),

    /// No data arrived within the read idle timeout.
    #[error("stream stalled: no data for {0:?}")]
    Stalled(Duration),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or the status reason.
        message: String,
    },

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The operation was cancelled.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// The HTTP status carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Build a `Status` error from a non-success response, reading its body
    /// for a server message.
    pub async fn from_response(response: HttpResponse) -> Self {
        Self::from_response_within(response, None).await
    }

    /// Like [`from_response`](Self::from_response), but stops reading the
    /// body after `timeout` and falls back to the status reason.
    pub async fn from_response_within(response: HttpResponse, timeout: Option<Duration>) -> Self {
        let (status, _, body) = response.into_parts();
        let body = match collect_body_within(body, timeout).await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(status = status.as_u16(), error = %e, "Could not read error body");
                Bytes::new()
            }
        };
        let message = ApiErrorBody::parse(&body)
            .and_then(|err| err.message.or(err.code))
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });

        Self::Status {
            status: status.as_u16(),
            message,
        }
    }
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            // A body that breaks mid-read is a connection failure, not a bad response.
            TransportError::Network(m) | TransportError::Body(m) => Self::Network(m),
            TransportError::Cancelled => Self::Cancelled,
            TransportError::TimedOut(limit) => Self::Stalled(limit),
            TransportError::Decode(m) => Self::InvalidResponse(m),
            TransportError::InvalidRequest(m) => Self::InvalidRequest(m),
        }
    }
}

impl From<CoreError> for StreamError {
    fn from(err: CoreError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
