//! Error envelopes returned by the backend on non-2xx responses.
//!
//! Two shapes are in use:
//!
//! ```text
//! { "error": { "code": "CSRF_EXPIRED", "message": "..." } }
//! { "error": "Not found", "detail": "..." }
//! ```

use serde_json::Value;

/// Prefix shared by every CSRF rejection code.
pub const CSRF_CODE_PREFIX: &str = "CSRF_";

/// A parsed backend error body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiErrorBody {
    /// Machine-readable error code, if the body carried one.
    pub code: Option<String>,
    /// Human-readable message, if the body carried one.
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Parse an error body. Returns `None` if the bytes are not a JSON object.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        let map = value.as_object()?;

        let detail = map.get("detail").and_then(detail_text);
        let top_message = map.get("message").and_then(Value::as_str).map(String::from);

        let body = match map.get("error") {
            Some(Value::Object(err)) => Self {
                code: err.get("code").and_then(Value::as_str).map(String::from),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or(detail)
                    .or(top_message),
            },
            Some(Value::String(err)) => Self {
                code: looks_like_code(err).then(|| err.clone()),
                message: detail.or(top_message).or_else(|| Some(err.clone())),
            },
            _ => Self {
                code: map.get("code").and_then(Value::as_str).map(String::from),
                message: detail.or(top_message),
            },
        };

        Some(body)
    }

    /// Returns `true` if the error code marks a CSRF rejection.
    #[must_use]
    pub fn is_csrf_rejection(&self) -> bool {
        self.code
            .as_deref()
            .is_some_and(|code| code.starts_with(CSRF_CODE_PREFIX))
    }
}

fn detail_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn looks_like_code(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
