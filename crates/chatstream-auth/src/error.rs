//! Authentication and transport error types.

use std::time::Duration;

use thiserror::Error;

/// A result type using `AuthError`.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request never completed (connection refused, reset, DNS, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The response body could not be read to completion.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The response body did not finish arriving in time.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The response body was not what the caller expected.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Returns `true` if the request failed before a response arrived.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Errors that can occur while obtaining credentials.
///
/// These never escape enrollment or CSRF token fetches, which log and degrade
/// instead; they exist so the failure reason can be logged precisely.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The underlying request failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The response did not contain a required field.
    #[error("response missing field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_flagged() {
        assert!(TransportError::Network("refused".into()).is_network());
        assert!(!TransportError::Cancelled.is_network());
        assert!(!TransportError::Body("reset".into()).is_network());
    }

    #[test]
    fn auth_error_wraps_transport_message() {
        let err = AuthError::from(TransportError::Network("refused".into()));
        assert_eq!(err.to_string(), "network error: refused");
        assert_eq!(AuthError::Status(500).to_string(), "unexpected HTTP status 500");
    }
}
