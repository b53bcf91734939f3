//! Line-delimited JSON decoding for the query endpoint.
//!
//! The endpoint writes one JSON object per line, each carrying a `contents`
//! array. An object is considered complete once a `}` is immediately
//! followed by a newline.

use crate::Error;
use serde_json::Value;

/// A content update decoded from one JSON line.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryUpdate {
    /// The full AI text so far. Each update replaces the previous one.
    Ai { text: String, item: Value },
    /// A discrete result unit, passed through as received.
    Result(Value),
}

/// Incremental decoder that buffers bytes across network chunks.
#[derive(Debug, Default)]
pub struct JsonLinesDecoder {
    buffer: Vec<u8>,
}

impl JsonLinesDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every update completed by it.
    ///
    /// A malformed object yields one `Err` item; decoding continues after it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<QueryUpdate, Error>> {
        self.buffer.extend_from_slice(chunk);

        let mut updates = Vec::new();
        let mut start = 0;
        while let Some(offset) = find_boundary(&self.buffer[start..]) {
            // Keep the closing brace, drop the newline.
            let end = start + offset + 1;
            decode_object(&self.buffer[start..end], &mut updates);
            start = end + 1;
        }
        self.buffer.drain(..start);

        updates
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<Result<QueryUpdate, Error>> {
        let rest = std::mem::take(&mut self.buffer);
        let mut updates = Vec::new();
        if !rest.iter().all(u8::is_ascii_whitespace) {
            decode_object(&rest, &mut updates);
        }
        updates
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_boundary(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"}\n")
}

fn decode_object(raw: &[u8], updates: &mut Vec<Result<QueryUpdate, Error>>) {
    let parsed: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(e) => {
            updates.push(Err(Error::Parse(format!("JSON line parse error: {e}"))));
            return;
        }
    };

    let Some(contents) = parsed.get("contents").and_then(Value::as_array) else {
        return;
    };

    for item in contents {
        match item.get("type").and_then(Value::as_str) {
            Some("ai") => {
                let text = item
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty());
                if let Some(text) = text {
                    updates.push(Ok(QueryUpdate::Ai {
                        text: text.to_string(),
                        item: item.clone(),
                    }));
                }
            }
            Some("result") => updates.push(Ok(QueryUpdate::Result(item.clone()))),
            _ => {}
        }
    }
}
