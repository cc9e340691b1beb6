//! HTTP transport abstraction.
//!
//! Everything the client sends goes through a [`Transport`]. The production
//! implementation wraps `reqwest` with a cookie store, so server-set cookies
//! (the CSRF pairing cookie, session cookies) travel with every later call.
//! Responses expose their body as a byte stream so long-lived event streams
//! can be consumed incrementally.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// A response body delivered chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Create a request without a body.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a `GET` request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a `POST` request.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a `DELETE` request.
    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Attach a JSON body and the matching `Content-Type` header.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(body);
        self
    }

    /// Set a header, replacing any previous value.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns `true` for methods that require a CSRF token.
    #[must_use]
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::DELETE | Method::PATCH
        )
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ByteStream,
}

impl HttpResponse {
    /// Create a response from its parts.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Create a response with a fully buffered body.
    #[must_use]
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let body: ByteStream = if body.is_empty() {
            Box::pin(stream::empty::<Result<Bytes, TransportError>>())
        } else {
            Box::pin(stream::iter([Ok::<_, TransportError>(body)]))
        };
        Self::new(status, headers, body)
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Split into status, headers, and body stream.
    #[must_use]
    pub fn into_parts(self) -> (StatusCode, HeaderMap, ByteStream) {
        (self.status, self.headers, self.body)
    }

    /// Take the body as a stream of chunks.
    #[must_use]
    pub fn into_byte_stream(self) -> ByteStream {
        self.body
    }

    /// Read the whole body.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk fails to arrive.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        collect_body(self.body).await
    }

    /// Read the whole body as UTF-8 text, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Returns an error if a chunk fails to arrive.
    pub async fn text(self) -> Result<String, TransportError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read the whole body and deserialize it as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be read or is not valid JSON for `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, TransportError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Drain a body stream into one buffer.
///
/// # Errors
///
/// Returns the first chunk error.
pub async fn collect_body(mut body: ByteStream) -> Result<Bytes, TransportError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Drain a body stream, giving up once `timeout` passes. `None` waits forever.
///
/// # Errors
///
/// Returns `TransportError::TimedOut` if the body is not complete in time,
/// otherwise the first chunk error.
pub async fn collect_body_within(
    body: ByteStream,
    timeout: Option<Duration>,
) -> Result<Bytes, TransportError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, collect_body(body))
            .await
            .map_err(|_| TransportError::TimedOut(limit))?,
        None => collect_body(body).await,
    }
}

/// Trait for sending HTTP requests.
///
/// This seam lets the authenticated client and the stream controller run
/// against a scripted transport in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return once response headers have arrived.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Cancelled` if `cancel` fires first, and
    /// `TransportError::Network` if the request never completed.
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// `reqwest`-backed transport.
///
/// No overall request timeout is set: event-stream bodies stay open for as
/// long as the answer takes. Idle detection belongs to the stream reader.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a cookie store and the given connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Create a transport with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(method, &url).headers(headers);
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = builder.send() => result.map_err(|e| {
                if e.is_builder() {
                    TransportError::InvalidRequest(e.to_string())
                } else {
                    TransportError::Network(e.to_string())
                }
            })?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        tracing::debug!(url = %url, status = %status, "Received response headers");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())));

        Ok(HttpResponse::new(status, headers, Box::pin(body)))
    }
}
