//! Incremental decoding of event-stream frames.
//!
//! The backend streams frames of the form:
//!
//! ```text
//! event: <type>
//! data: <json>
//!
//! ```
//!
//! Network chunks do not respect frame boundaries, line boundaries, or even
//! UTF-8 character boundaries. [`FrameDecoder`] holds back the bytes of an
//! incomplete trailing character and the text of an incomplete trailing
//! frame until more input arrives.

use std::mem;

use serde_json::Value;

/// Type reported for frames that carry neither an `event:` line nor a `type` field.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

const FRAME_DELIMITER: &str = "\n\n";
const DATA_PREFIX: &str = "data: ";
const EVENT_PREFIX: &str = "event: ";

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    /// The `event:` line if present, else the payload's `type` field.
    pub event_type: String,
    /// The parsed `data:` payload.
    pub data: Value,
}

/// Stateful parser turning byte chunks into [`EventFrame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Leading bytes of a character split across chunks.
    pending_bytes: Vec<u8>,
    /// Decoded text not yet terminated by a blank line.
    buffer: String,
    /// Length of the `buffer` prefix already searched for a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return every frame it completes.
    ///
    /// Pass `is_final = true` on the last call (with or without bytes) to
    /// flush held-back bytes and parse any unterminated trailing frame.
    pub fn feed(&mut self, chunk: Option<&[u8]>, is_final: bool) -> Vec<EventFrame> {
        if let Some(chunk) = chunk {
            self.decode(chunk);
        }
        if is_final {
            self.flush_bytes();
        }

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut search_from = self.resume_offset();
        while let Some(offset) = self.buffer[search_from..].find(FRAME_DELIMITER) {
            let end = search_from + offset;
            frames.extend(parse_frame(&self.buffer[consumed..end]));
            consumed = end + FRAME_DELIMITER.len();
            search_from = consumed;
        }
        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();

        if is_final {
            let rest = mem::take(&mut self.buffer);
            self.scanned = 0;
            frames.extend(parse_frame(&rest));
        }

        frames
    }

    /// Where the next delimiter search starts. The scanned prefix holds no
    /// delimiter, but its final newline may pair with the next chunk's first.
    fn resume_offset(&self) -> usize {
        if self.buffer.as_bytes()[..self.scanned].ends_with(b"\n") {
            self.scanned - 1
        } else {
            self.scanned
        }
    }

    /// Returns `true` if no partial input is held back.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_bytes.is_empty() && self.buffer.is_empty()
    }

    fn decode(&mut self, chunk: &[u8]) {
        let input = if self.pending_bytes.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = mem::take(&mut self.pending_bytes);
            joined.extend_from_slice(chunk);
            joined
        };

        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete character at the end: wait for the next chunk.
                            self.pending_bytes = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn flush_bytes(&mut self) {
        if !self.pending_bytes.is_empty() {
            let pending = mem::take(&mut self.pending_bytes);
            self.buffer.push_str(&String::from_utf8_lossy(&pending));
        }
    }
}

/// Parse one blank-line-delimited block. Blocks without a `data:` line or
/// with an unparseable payload yield `None`.
fn parse_frame(block: &str) -> Option<EventFrame> {
    let mut data_line = None;
    let mut event_line = None;

    for line in block.lines() {
        if data_line.is_none() {
            if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
                data_line = Some(rest);
                continue;
            }
        }
        if event_line.is_none() {
            if let Some(rest) = line.strip_prefix(EVENT_PREFIX) {
                event_line = Some(rest.trim());
            }
        }
    }

    let data: Value = match serde_json::from_str(data_line?) {
        Ok(data) => data,
        Err(e) => {
            tracing::trace!(error = %e, "Dropping malformed frame");
            return None;
        }
    };

    let event_type = event_line
        .filter(|t| !t.is_empty())
        .map(String::from)
        .or_else(|| data.get("type").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());

    Some(EventFrame { event_type, data })
}
