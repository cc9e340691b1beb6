//! Retry classification and backoff schedule.
//!
//! Both are pure functions of the policy so they can be tested without I/O.

use std::time::Duration;

use crate::error::StreamError;

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Worth another attempt after a backoff.
    Retryable,
    /// Ends the operation.
    Fatal,
}

/// Attempt ceiling, backoff schedule, and transient status set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Factor applied to the delay for each further attempt.
    pub multiplier: u32,
    /// HTTP statuses treated as transient.
    pub transient_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            multiplier: 2,
            transient_statuses: vec![502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Classify a failed attempt.
    ///
    /// Network failures, stalls, and transient statuses are retryable;
    /// everything else (including cancellation) is fatal.
    #[must_use]
    pub fn classify(&self, error: &StreamError) -> Retryability {
        match error {
            StreamError::Network(_) | StreamError::Stalled(_) => Retryability::Retryable,
            StreamError::Status { status, .. } if self.transient_statuses.contains(status) => {
                Retryability::Retryable
            }
            _ => Retryability::Fatal,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed):
    /// `base_delay * multiplier^(attempt - 1)`, saturating.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Returns `true` if `error` on attempt `attempt` should be followed by another attempt.
    #[must_use]
    pub fn should_retry(&self, error: &StreamError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.classify(error) == Retryability::Retryable
    }
}
