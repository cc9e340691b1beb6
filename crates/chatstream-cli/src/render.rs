//! Terminal rendering of stream events.

use chatstream_client::dispatch::{TIP_CLOSE, TIP_OPEN};
use chatstream_core::ChatEvent;

/// Where a rendered event goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The answer itself.
    Stdout,
    /// Status and diagnostics.
    Stderr,
}

/// Render one event as text for the terminal.
///
/// Returns `None` for events with nothing to show.
pub fn render(event: &ChatEvent) -> Option<(Target, String)> {
    match event {
        ChatEvent::Text(text) | ChatEvent::Products(text) => Some((Target::Stdout, text.clone())),
        ChatEvent::Tip(tip) => {
            let body = tip
                .trim_start_matches('\n')
                .trim_start_matches(TIP_OPEN)
                .trim_end_matches(TIP_CLOSE)
                .trim();
            Some((Target::Stdout, format!("\n\nTip: {body}\n")))
        }
        ChatEvent::Thinking(thinking) => Some((Target::Stderr, format!("[thinking] {thinking}\n"))),
        ChatEvent::QuickReplies(replies) => {
            let mut out = String::from("\n\nSuggestions:\n");
            for (i, reply) in replies.iter().enumerate() {
                out.push_str(&format!("  {}. {}\n", i + 1, reply.title));
            }
            Some((Target::Stdout, out))
        }
        ChatEvent::Done { session_id } => session_id
            .as_ref()
            .map(|id| (Target::Stderr, format!("\n[session {id}]\n"))),
        ChatEvent::Error(message) => Some((Target::Stderr, format!("\nerror: {message}\n"))),
        ChatEvent::TruncationWarning(reason) => Some((
            Target::Stderr,
            format!("\nwarning: answer truncated ({reason})\n"),
        )),
        ChatEvent::Reconnecting {
            attempt,
            max_attempts,
        } => Some((
            Target::Stderr,
            format!("\n[connection lost, reconnecting: attempt {attempt}/{max_attempts} failed]\n"),
        )),
        ChatEvent::StreamEnd => Some((Target::Stdout, "\n".to_string())),
    }
}
