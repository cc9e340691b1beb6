//! Mapping decoded frames to handler callbacks.
//!
//! | type                 | source field                     | callback                  |
//! |----------------------|----------------------------------|---------------------------|
//! | `text`               | `content`, tip blocks stripped   | `on_text`                 |
//! | `products`           | `content`, blank-line prefixed   | `on_products`             |
//! | `tip`                | `text` or `content`, re-tagged   | `on_tip`                  |
//! | `thinking`           | `content`                        | `on_thinking`             |
//! | `quick_replies`      | `options`, `replies`, `content`  | `on_quick_replies`        |
//! | `done`               | `session_id` (optional)          | `on_done`                 |
//! | `error`              | `message` or `content`           | `on_error`                |
//! | `truncation_warning` | `finish_reason`                  | `on_truncation_warning`   |

use serde_json::Value;
use tokio::sync::mpsc;

use chatstream_core::{ChatEvent, QuickReply};

use crate::decoder::EventFrame;

/// Opening marker of an inline tip block.
pub const TIP_OPEN: &str = "[TIP]";
/// Closing marker of an inline tip block.
pub const TIP_CLOSE: &str = "[/TIP]";

/// Message used when an `error` frame carries no text.
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong while generating the answer.";

/// Finish reason used when a `truncation_warning` frame carries none.
pub const DEFAULT_FINISH_REASON: &str = "length";

/// Receives dispatched stream events.
///
/// Callbacks run sequentially in frame order on the task driving the stream.
pub trait EventHandler: Send {
    /// Answer text, tip blocks removed.
    fn on_text(&mut self, text: &str);

    /// Product block.
    fn on_products(&mut self, products: &str);

    /// Tip block with its markers restored.
    fn on_tip(&mut self, tip: &str);

    /// Reasoning text.
    fn on_thinking(&mut self, thinking: &str);

    /// Suggested follow-ups. Never called with an empty list.
    fn on_quick_replies(&mut self, replies: &[QuickReply]);

    /// The backend finished the answer.
    fn on_done(&mut self, session_id: Option<&str>);

    /// In-band error reported by the backend.
    fn on_error(&mut self, message: &str);

    /// The answer was cut short.
    fn on_truncation_warning(&mut self, _finish_reason: &str) {}

    /// Attempt `attempt` of `max_attempts` failed transiently; a retry follows.
    fn on_reconnecting(&mut self, _attempt: u32, _max_attempts: u32) {}

    /// The streaming operation ended. Called exactly once per operation.
    fn on_stream_end(&mut self) {}
}

/// Dispatch one event to `handler`.
///
/// Returns `true` if the event was recognized and a callback ran. The
/// return value is diagnostic only.
pub fn dispatch<H: EventHandler + ?Sized>(event_type: &str, data: &Value, handler: &mut H) -> bool {
    match event_type {
        "text" => match non_empty_str(data, "content") {
            Some(content) => {
                handler.on_text(&strip_tip_blocks(content));
                true
            }
            None => false,
        },
        "products" => match non_empty_str(data, "content") {
            Some(content) => {
                handler.on_products(&format!("\n\n{content}"));
                true
            }
            None => false,
        },
        "tip" => match non_empty_str(data, "text").or_else(|| non_empty_str(data, "content")) {
            Some(text) => {
                handler.on_tip(&format!("\n\n{TIP_OPEN}\n{text}\n{TIP_CLOSE}"));
                true
            }
            None => false,
        },
        "thinking" => match non_empty_str(data, "content") {
            Some(content) => {
                handler.on_thinking(content);
                true
            }
            None => false,
        },
        "quick_replies" => {
            let replies: Vec<QuickReply> = ["options", "replies", "content"]
                .iter()
                .find_map(|field| data.get(*field).and_then(Value::as_array))
                .map(|entries| entries.iter().filter_map(QuickReply::from_value).collect())
                .unwrap_or_default();
            if replies.is_empty() {
                return false;
            }
            handler.on_quick_replies(&replies);
            true
        }
        "done" => {
            handler.on_done(data.get("session_id").and_then(Value::as_str));
            true
        }
        "error" => {
            let message = non_empty_str(data, "message")
                .or_else(|| non_empty_str(data, "content"))
                .unwrap_or(DEFAULT_ERROR_MESSAGE);
            handler.on_error(message);
            true
        }
        "truncation_warning" => {
            let reason = non_empty_str(data, "finish_reason").unwrap_or(DEFAULT_FINISH_REASON);
            handler.on_truncation_warning(reason);
            true
        }
        other => {
            tracing::debug!(event_type = other, "Unhandled stream event");
            false
        }
    }
}

/// Dispatch a decoded frame.
pub fn dispatch_frame<H: EventHandler + ?Sized>(frame: &EventFrame, handler: &mut H) -> bool {
    dispatch(&frame.event_type, &frame.data, handler)
}

/// Remove every complete `[TIP]...[/TIP]` block from `text`.
///
/// An opening marker without a matching close is left untouched.
#[must_use]
pub fn strip_tip_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(TIP_OPEN) {
        let after_open = &rest[start + TIP_OPEN.len()..];
        let Some(end) = after_open.find(TIP_CLOSE) else {
            break;
        };
        out.push_str(&rest[..start]);
        rest = &after_open[end + TIP_CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

fn non_empty_str<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Handler that forwards every callback as a [`ChatEvent`] over a channel.
///
/// Sends to a closed channel are ignored.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Wrap an existing sender.
    #[must_use]
    pub const fn from_sender(tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self { tx }
    }

    fn send(&self, event: ChatEvent) {
        let _ = self.tx.send(event);
    }
}

impl EventHandler for ChannelHandler {
    fn on_text(&mut self, text: &str) {
        self.send(ChatEvent::Text(text.to_string()));
    }

    fn on_products(&mut self, products: &str) {
        self.send(ChatEvent::Products(products.to_string()));
    }

    fn on_tip(&mut self, tip: &str) {
        self.send(ChatEvent::Tip(tip.to_string()));
    }

    fn on_thinking(&mut self, thinking: &str) {
        self.send(ChatEvent::Thinking(thinking.to_string()));
    }

    fn on_quick_replies(&mut self, replies: &[QuickReply]) {
        self.send(ChatEvent::QuickReplies(replies.to_vec()));
    }

    fn on_done(&mut self, session_id: Option<&str>) {
        self.send(ChatEvent::Done {
            session_id: session_id.map(String::from),
        });
    }

    fn on_error(&mut self, message: &str) {
        self.send(ChatEvent::Error(message.to_string()));
    }

    fn on_truncation_warning(&mut self, finish_reason: &str) {
        self.send(ChatEvent::TruncationWarning(finish_reason.to_string()));
    }

    fn on_reconnecting(&mut self, attempt: u32, max_attempts: u32) {
        self.send(ChatEvent::Reconnecting {
            attempt,
            max_attempts,
        });
    }

    fn on_stream_end(&mut self) {
        self.send(ChatEvent::StreamEnd);
    }
}

/// Collects events in order. Handy for tests and for buffering a whole answer.
impl EventHandler for Vec<ChatEvent> {
    fn on_text(&mut self, text: &str) {
        self.push(ChatEvent::Text(text.to_string()));
    }

    fn on_products(&mut self, products: &str) {
        self.push(ChatEvent::Products(products.to_string()));
    }

    fn on_tip(&mut self, tip: &str) {
        self.push(ChatEvent::Tip(tip.to_string()));
    }

    fn on_thinking(&mut self, thinking: &str) {
        self.push(ChatEvent::Thinking(thinking.to_string()));
    }

    fn on_quick_replies(&mut self, replies: &[QuickReply]) {
        self.push(ChatEvent::QuickReplies(replies.to_vec()));
    }

    fn on_done(&mut self, session_id: Option<&str>) {
        self.push(ChatEvent::Done {
            session_id: session_id.map(String::from),
        });
    }

    fn on_error(&mut self, message: &str) {
        self.push(ChatEvent::Error(message.to_string()));
    }

    fn on_truncation_warning(&mut self, finish_reason: &str) {
        self.push(ChatEvent::TruncationWarning(finish_reason.to_string()));
    }

    fn on_reconnecting(&mut self, attempt: u32, max_attempts: u32) {
        self.push(ChatEvent::Reconnecting {
            attempt,
            max_attempts,
        });
    }

    fn on_stream_end(&mut self) {
        self.push(ChatEvent::StreamEnd);
    }
}
