//! Session management requests.
//!
//! These are plain request/response calls, but they travel through the same
//! authenticated client as the stream so key rotation and CSRF refresh apply.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use chatstream_auth::{AuthenticatedClient, HttpResponse};
use chatstream_core::{SessionId, UserId};

use crate::error::{Result, StreamError};

/// One stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    #[serde(alias = "id")]
    pub session_id: String,
    /// Display title, usually the first question.
    #[serde(default)]
    pub title: Option<String>,
    /// Last activity, as reported by the server.
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Number of stored messages.
    #[serde(default)]
    pub message_count: Option<u64>,
}

/// One message of a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// When the message was stored.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Either a bare array or one wrapped under a named field.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Sessions { sessions: Vec<T> },
    Messages { messages: Vec<T> },
    History { history: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items)
            | Self::Sessions { sessions: items }
            | Self::Messages { messages: items }
            | Self::History { history: items } => items,
        }
    }
}

/// Client for the session endpoints.
#[derive(Clone)]
pub struct SessionClient {
    client: AuthenticatedClient,
}

impl SessionClient {
    /// Create a session client.
    #[must_use]
    pub const fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.client.config().base_url)
    }

    /// List the stored sessions of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers non-2xx.
    pub async fn list_sessions(
        &self,
        user_id: &UserId,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionSummary>> {
        let response = self
            .client
            .get(self.url(&format!("/sessions/{user_id}")), cancel)
            .await?;
        let listing: Listing<SessionSummary> = read_json(response).await?;
        Ok(listing.into_vec())
    }

    /// Fetch the messages of one session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers non-2xx.
    pub async fn history(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/session/{session_id}/history")), cancel)
            .await?;
        let listing: Listing<HistoryMessage> = read_json(response).await?;
        Ok(listing.into_vec())
    }

    /// Delete everything stored for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server answers non-2xx.
    pub async fn delete_user_data(&self, user_id: &UserId, cancel: &CancellationToken) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/user/{user_id}/data")), cancel)
            .await?;
        if !response.status().is_success() {
            return Err(StreamError::from_response(response).await);
        }
        tracing::info!(user_id = %user_id, "Deleted user data");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    if !response.status().is_success() {
        return Err(StreamError::from_response(response).await);
    }
    Ok(response.json().await?)
}
