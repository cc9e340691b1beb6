//! API key enrollment and CSRF token fetching.
//!
//! Both operations are best-effort: failures are logged and reported as
//! "nothing obtained", never as errors, so callers can always proceed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use chatstream_core::UserId;

use crate::error::{AuthError, Result};
use crate::store::CredentialStore;
use crate::transport::{HttpRequest, Transport};
use crate::AuthConfig;

/// Request payload for `POST /auth/key`.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollRequest<'a> {
    /// The user to issue a key for.
    pub user_id: &'a UserId,
}

/// Response from `POST /auth/key`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollResponse {
    /// The issued API key.
    pub key: String,
    /// Non-secret prefix of the key, for logs.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// Response from `GET /csrf-token`.
#[derive(Debug, Deserialize)]
struct CsrfTokenResponse {
    csrf_token: String,
}

/// Obtains credentials from the backend and writes them to the store.
#[derive(Clone)]
pub struct CredentialClient {
    config: AuthConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
}

impl CredentialClient {
    /// Create a credential client.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
        }
    }

    /// Make sure an API key is stored for `user_id`.
    ///
    /// Returns immediately if a key is already stored. Otherwise issues one
    /// enrollment request and stores the returned key. Any failure is logged
    /// and swallowed.
    pub async fn enroll(&self, user_id: &UserId, cancel: &CancellationToken) {
        if self.store.user_id().as_ref() != Some(user_id) {
            self.store.set_user_id(user_id);
        }

        if self.store.key().is_some() {
            tracing::debug!(user_id = %user_id, "API key already stored, skipping enrollment");
            return;
        }

        match self.request_key(user_id, cancel).await {
            Ok(response) => {
                self.store.set_key(&response.key);
                tracing::info!(
                    user_id = %user_id,
                    key_prefix = response.key_prefix.as_deref().unwrap_or("-"),
                    "Enrolled API key"
                );
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "API key enrollment failed");
            }
        }
    }

    /// Fetch a fresh CSRF token, store it, and return it.
    ///
    /// Returns `None` on any failure.
    pub async fn fetch_csrf_token(&self, cancel: &CancellationToken) -> Option<String> {
        match self.request_csrf_token(cancel).await {
            Ok(token) => {
                self.store.set_csrf_token(&token);
                tracing::debug!("Fetched CSRF token");
                Some(token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "CSRF token fetch failed");
                None
            }
        }
    }

    async fn request_key(
        &self,
        user_id: &UserId,
        cancel: &CancellationToken,
    ) -> Result<EnrollResponse> {
        let body = serde_json::to_value(EnrollRequest { user_id })
            .map_err(|e| crate::TransportError::InvalidRequest(e.to_string()))?;
        let request = HttpRequest::post(self.config.enroll_url()).json(body);

        let response = self.transport.send(request, cancel).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let enrolled: EnrollResponse = response.json().await?;
        if enrolled.key.is_empty() {
            return Err(AuthError::MissingField("key"));
        }
        Ok(enrolled)
    }

    async fn request_csrf_token(&self, cancel: &CancellationToken) -> Result<String> {
        let request = HttpRequest::get(self.config.csrf_url());

        let response = self.transport.send(request, cancel).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: CsrfTokenResponse = response.json().await?;
        if body.csrf_token.is_empty() {
            return Err(AuthError::MissingField("csrf_token"));
        }
        Ok(body.csrf_token)
    }
}
