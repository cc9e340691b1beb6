//! Semantic events produced while streaming an answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One suggested follow-up shown as a button under the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    /// Label shown to the user.
    pub title: String,
    /// Text sent back when the reply is chosen.
    pub payload: String,
}

impl QuickReply {
    /// Create a quick reply.
    #[must_use]
    pub fn new(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            payload: payload.into(),
        }
    }

    /// Normalize one entry of a `quick_replies` array.
    ///
    /// Accepts `{title, payload}` objects, tolerates `label`/`value` spellings,
    /// and accepts bare strings (used as both title and payload). The payload
    /// falls back to the title. Entries without a usable title yield `None`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self::new(s.clone(), s.clone())),
            Value::Object(map) => {
                let title = map
                    .get("title")
                    .or_else(|| map.get("label"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())?;
                let payload = map
                    .get("payload")
                    .or_else(|| map.get("value"))
                    .and_then(Value::as_str)
                    .unwrap_or(title);
                Some(Self::new(title, payload))
            }
            _ => None,
        }
    }
}

/// A dispatched stream event in variant form.
///
/// This mirrors the callbacks of an event handler one-to-one and is what
/// channel-based consumers receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Answer text with inline tip blocks removed.
    Text(String),
    /// Product block, prefixed with a blank-line separator.
    Products(String),
    /// Tip block wrapped in `[TIP]`/`[/TIP]` markers.
    Tip(String),
    /// Reasoning shown while the answer is produced.
    Thinking(String),
    /// Suggested follow-ups.
    QuickReplies(Vec<QuickReply>),
    /// The backend finished the answer.
    Done {
        /// Session the exchange was stored under, when reported.
        session_id: Option<String>,
    },
    /// The backend reported an in-band error.
    Error(String),
    /// The answer was cut short by the model.
    TruncationWarning(String),
    /// A transient failure occurred and another attempt is about to start.
    Reconnecting {
        /// The attempt that just failed (1-indexed).
        attempt: u32,
        /// Maximum number of attempts.
        max_attempts: u32,
    },
    /// The streaming operation ended, whatever the outcome.
    StreamEnd,
}
