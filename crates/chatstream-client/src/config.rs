//! Client configuration.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use chatstream_auth::AuthConfig;

use crate::retry::RetryPolicy;

/// Errors loading a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {name}: {value:?}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Configuration for the chat client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Backend base URL (e.g., `http://localhost:8000`).
    pub backend_url: String,

    /// Maximum attempts per streaming operation.
    #[serde(default = "ClientConfig::default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "ClientConfig::default_base_delay")]
    pub base_delay_ms: u64,

    /// Factor applied to the delay for each further attempt.
    #[serde(default = "ClientConfig::default_multiplier")]
    pub backoff_multiplier: u32,

    /// HTTP statuses retried as transient.
    #[serde(default = "ClientConfig::default_transient_statuses")]
    pub transient_statuses: Vec<u16>,

    /// Seconds without a chunk before a stream counts as stalled. 0 disables.
    #[serde(default = "ClientConfig::default_read_idle_timeout")]
    pub read_idle_timeout_seconds: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "ClientConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Fetch a CSRF token before the first state-changing request.
    #[serde(default = "ClientConfig::default_csrf_preflight")]
    pub csrf_preflight: bool,
}

impl ClientConfig {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_base_delay() -> u64 {
        1000
    }

    const fn default_multiplier() -> u32 {
        2
    }

    fn default_transient_statuses() -> Vec<u16> {
        vec![502, 503, 504]
    }

    const fn default_read_idle_timeout() -> u64 {
        90
    }

    const fn default_connect_timeout() -> u64 {
        10
    }

    const fn default_csrf_preflight() -> bool {
        true
    }

    /// Create a configuration for `backend_url` with defaults everywhere else.
    #[must_use]
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            max_attempts: Self::default_max_attempts(),
            base_delay_ms: Self::default_base_delay(),
            backoff_multiplier: Self::default_multiplier(),
            transient_statuses: Self::default_transient_statuses(),
            read_idle_timeout_seconds: Self::default_read_idle_timeout(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            csrf_preflight: Self::default_csrf_preflight(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// - `CHATSTREAM_BACKEND_URL` (required)
    /// - `CHATSTREAM_MAX_ATTEMPTS`
    /// - `CHATSTREAM_BASE_DELAY_MS`
    /// - `CHATSTREAM_READ_IDLE_TIMEOUT_SECONDS`
    ///
    /// # Errors
    ///
    /// Returns an error if the backend URL is missing or a numeric variable
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = lookup("CHATSTREAM_BACKEND_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("CHATSTREAM_BACKEND_URL"))?;
        let mut config = Self::new(backend_url.trim());

        if let Some(n) = parse_var(&lookup, "CHATSTREAM_MAX_ATTEMPTS")? {
            config.max_attempts = n;
        }
        if let Some(n) = parse_var(&lookup, "CHATSTREAM_BASE_DELAY_MS")? {
            config.base_delay_ms = n;
        }
        if let Some(n) = parse_var(&lookup, "CHATSTREAM_READ_IDLE_TIMEOUT_SECONDS")? {
            config.read_idle_timeout_seconds = n;
        }

        Ok(config)
    }

    /// The retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.backoff_multiplier,
            transient_statuses: self.transient_statuses.clone(),
        }
    }

    /// Get the read idle timeout, `None` when disabled.
    #[must_use]
    pub const fn read_idle_timeout(&self) -> Option<Duration> {
        match self.read_idle_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// The auth-layer view of this configuration.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        let mut auth = AuthConfig::new(self.backend_url.clone());
        auth.csrf_preflight = self.csrf_preflight;
        auth.body_read_timeout = self.read_idle_timeout();
        auth
    }

    /// URL of the streaming chat endpoint.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("{}/chat/stream", self.backend_url.trim_end_matches('/'))
    }
}

fn parse_var<F, T>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
