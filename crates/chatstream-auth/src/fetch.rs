//! Authenticated requests with credential injection and one-shot recovery.
//!
//! Every request gets the stored API key as `X-API-Key` and, for
//! state-changing methods, the CSRF token as `X-CSRF-Token`. Two rejections
//! are recovered from transparently, each with at most one retry:
//!
//! - **401**: the key is stale (or was never stored). Clear it, re-enroll for
//!   the stored user, and retry once with the new key.
//! - **403 with a `CSRF_*` code**: the token expired. Refresh it and retry
//!   once with the new token.
//!
//! A retry's own response is returned as-is.

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use chatstream_core::ApiErrorBody;

use crate::credentials::CredentialClient;
use crate::error::TransportError;
use crate::store::CredentialStore;
use crate::transport::{collect_body_within, HttpRequest, HttpResponse, Transport};
use crate::AuthConfig;

/// Header carrying the API key.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Header carrying the CSRF token.
pub const CSRF_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");

/// HTTP client that injects credentials and recovers from auth rejections.
#[derive(Clone)]
pub struct AuthenticatedClient {
    config: AuthConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    credentials: CredentialClient,
}

impl AuthenticatedClient {
    /// Create an authenticated client.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let credentials = CredentialClient::new(config.clone(), transport.clone(), store.clone());
        Self {
            config,
            transport,
            store,
            credentials,
        }
    }

    /// The authentication configuration.
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The credential store shared by this client.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// The enrollment and CSRF client.
    #[must_use]
    pub const fn credentials(&self) -> &CredentialClient {
        &self.credentials
    }

    /// Send a request with credentials attached.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request (or its single recovery retry)
    /// fails to produce a response. Auth rejections that cannot be recovered
    /// are returned as ordinary responses.
    pub async fn request(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        if self.config.csrf_preflight
            && request.is_state_changing()
            && self.store.csrf_token().is_none()
        {
            self.credentials.fetch_csrf_token(cancel).await;
        }

        let (authorized, key_sent) = self.authorize(&request);
        let response = self.transport.send(authorized, cancel).await?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                self.recover_unauthorized(request, key_sent, response, cancel)
                    .await
            }
            StatusCode::FORBIDDEN => self.recover_csrf(request, response, cancel).await,
            _ => Ok(response),
        }
    }

    /// Send an authenticated `GET` to `url`.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::request`].
    pub async fn get(
        &self,
        url: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        self.request(HttpRequest::get(url), cancel).await
    }

    /// Send an authenticated `DELETE` to `url`.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatedClient::request`].
    pub async fn delete(
        &self,
        url: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        self.request(HttpRequest::delete(url), cancel).await
    }

    /// Attach the currently stored credentials. Returns whether a key was sent.
    ///
    /// A stored key that is not a valid header value is cleared, so a 401
    /// re-enrolls instead of retrying without a key.
    fn authorize(&self, request: &HttpRequest) -> (HttpRequest, bool) {
        let mut authorized = request.clone();

        let key_sent = match self.store.key() {
            Some(key) => {
                let sent = insert_header(&mut authorized, API_KEY_HEADER, &key);
                if !sent {
                    self.store.clear_key();
                }
                sent
            }
            None => false,
        };

        if authorized.is_state_changing() {
            if let Some(token) = self.store.csrf_token() {
                insert_header(&mut authorized, CSRF_TOKEN_HEADER, &token);
            }
        }

        (authorized, key_sent)
    }

    async fn recover_unauthorized(
        &self,
        request: HttpRequest,
        key_sent: bool,
        original: HttpResponse,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        if key_sent {
            tracing::warn!(url = %request.url, "API key rejected, clearing and re-enrolling");
            self.store.clear_key();
        } else {
            tracing::debug!(url = %request.url, "Unauthorized without API key, enrolling");
        }

        let Some(user_id) = self.store.user_id() else {
            tracing::warn!("No stored user ID, cannot re-enroll");
            return Ok(original);
        };

        self.credentials.enroll(&user_id, cancel).await;
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.store.key().is_none() {
            return Ok(original);
        }

        let (retry, _) = self.authorize(&request);
        self.transport.send(retry, cancel).await
    }

    async fn recover_csrf(
        &self,
        request: HttpRequest,
        original: HttpResponse,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let (status, headers, body) = original.into_parts();
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            bytes = collect_body_within(body, self.config.body_read_timeout) => bytes?,
        };

        let is_csrf = ApiErrorBody::parse(&bytes).is_some_and(|err| err.is_csrf_rejection());
        let original = HttpResponse::from_bytes(status, headers, bytes);
        if !is_csrf {
            return Ok(original);
        }

        tracing::warn!(url = %request.url, "CSRF token rejected, refreshing");
        self.store.clear_csrf_token();
        if self.credentials.fetch_csrf_token(cancel).await.is_none() {
            return Ok(original);
        }

        let (retry, _) = self.authorize(&request);
        self.transport.send(retry, cancel).await
    }
}

fn insert_header(request: &mut HttpRequest, name: HeaderName, value: &str) -> bool {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            request.headers.insert(name, value);
            true
        }
        Err(_) => {
            tracing::warn!(header = %name, "Stored credential is not a valid header value, skipping");
            false
        }
    }
}
