//! Request payloads sent to the chat backend.

use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};

/// Body of `POST /chat/stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user asking the question.
    pub user_id: UserId,
    /// The user's message.
    pub message: String,
    /// Session to continue, or `null` to let the backend open a new one.
    pub session_id: Option<SessionId>,
    /// Whether the backend should persist this exchange in the session history.
    pub save_history: bool,
}

impl ChatRequest {
    /// Create a request that starts a new, history-saving session.
    #[must_use]
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            session_id: None,
            save_history: true,
        }
    }

    /// Continue an existing session.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set whether the backend should save this exchange.
    #[must_use]
    pub const fn save_history(mut self, save: bool) -> Self {
        self.save_history = save;
        self
    }

    /// Serialize into the JSON value posted on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
