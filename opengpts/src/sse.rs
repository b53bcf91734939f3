//! Server-sent event decoding for the headless stream endpoint.
//!
//! Blocks are separated by a blank line (`\n\n` or `\r\n\r\n`). The
//! endpoint is loose about framing, so each block is read as one of:
//!
//! 1. `event:` and `data:` lines
//! 2. `data:` lines only (event name `data`)
//! 3. a bare JSON object
//! 4. plain text
//!
//! Data that is not JSON is wrapped as `{"text": raw}`.

use crate::Error;
use serde_json::{json, Value};

/// Event name used when a block does not carry one.
pub const DEFAULT_EVENT: &str = "data";

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub event: String,
    pub data: Value,
}

impl SseMessage {
    fn data(data: Value) -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            data,
        }
    }
}

/// Incremental decoder that buffers bytes across network chunks.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseMessage, Error>> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some((offset, separator)) = find_separator(&self.buffer[start..]) {
            let block = String::from_utf8_lossy(&self.buffer[start..start + offset]);
            if let Some(message) = decode_block(&block) {
                messages.push(message);
            }
            start += offset + separator;
        }
        self.buffer.drain(..start);

        messages
    }

    /// Decode a trailing block that was never terminated by a blank line.
    pub fn finish(&mut self) -> Vec<Result<SseMessage, Error>> {
        let rest = std::mem::take(&mut self.buffer);
        let block = String::from_utf8_lossy(&rest);
        decode_block(&block).into_iter().collect()
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Position and length of the earliest block separator.
fn find_separator(bytes: &[u8]) -> Option<(usize, usize)> {
    let lf = bytes.windows(2).position(|w| w == b"\n\n");
    let crlf = bytes.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(lf), Some(crlf)) if crlf < lf => Some((crlf, 4)),
        (Some(lf), _) => Some((lf, 2)),
        (None, Some(crlf)) => Some((crlf, 4)),
        (None, None) => None,
    }
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?.strip_prefix(':')
}

fn decode_block(block: &str) -> Option<Result<SseMessage, Error>> {
    let trimmed = block.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut event: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut framed = false;

    for line in block.lines() {
        if line.starts_with(':') {
            framed = true;
        } else if let Some(value) = field(line, "event") {
            framed = true;
            event = Some(value.trim());
        } else if let Some(value) = field(line, "data") {
            framed = true;
            data_lines.push(value.trim());
        } else if field(line, "id").is_some() || field(line, "retry").is_some() {
            framed = true;
        }
    }

    if !data_lines.is_empty() {
        let raw = data_lines.join("\n");
        if raw == DONE_SENTINEL {
            return None;
        }
        let event = event
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_EVENT)
            .to_string();
        let data = serde_json::from_str(&raw).unwrap_or_else(|_| json!({ "text": raw }));
        return Some(Ok(SseMessage { event, data }));
    }

    if framed {
        // Comments, ids, or an event name with no data: nothing to dispatch.
        return None;
    }

    if trimmed.starts_with('{') {
        return Some(
            serde_json::from_str(trimmed)
                .map(SseMessage::data)
                .map_err(|e| Error::Parse(format!("SSE JSON block parse error: {e}"))),
        );
    }

    Some(Ok(SseMessage::data(json!({ "text": trimmed }))))
}
