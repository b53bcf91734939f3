//! Accumulation of one conversation turn.
//!
//! A `TurnLog` belongs to exactly one prompt submission. Records are folded
//! in arrival order; `ai` text follows replace semantics.

use crate::ingest::{StreamEventRecord, AI_EVENT, RESULT_EVENT};
use crate::normalize::{chapters_from_text, is_story_shaped};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// A streamed message as shown in the debug view, merged by id.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugMessage {
    pub id: String,
    pub kind: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnLog {
    records: Vec<StreamEventRecord>,
    ai_text: Option<String>,
    results: Vec<Value>,
    /// Every non-`ai` payload, in arrival order.
    units: Vec<Value>,
    messages: Vec<DebugMessage>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the turn.
    pub fn record(&mut self, record: StreamEventRecord) {
        match record.event_type.as_str() {
            AI_EVENT => {
                if let Some(text) = text_of(&record.payload) {
                    self.ai_text = Some(text.to_string());
                }
                self.merge_message(&record);
            }
            RESULT_EVENT => {
                self.results.push(record.payload.clone());
                self.units.push(record.payload.clone());
            }
            _ => self.units.push(record.payload.clone()),
        }
        self.records.push(record);
    }

    fn merge_message(&mut self, record: &StreamEventRecord) {
        let Some(id) = record.payload.get("id").and_then(Value::as_str) else {
            return;
        };
        let content = text_of(&record.payload).unwrap_or_default().to_string();

        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(existing) => {
                existing.content = content;
                existing.timestamp = record.timestamp;
            }
            None => self.messages.push(DebugMessage {
                id: id.to_string(),
                kind: record.event_type.clone(),
                content,
                timestamp: record.timestamp,
            }),
        }
    }

    /// The latest `ai` text.
    pub fn ai_text(&self) -> Option<&str> {
        self.ai_text.as_deref()
    }

    /// Result units, one per `result` record.
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Every non-`ai` payload in arrival order.
    pub fn units(&self) -> &[Value] {
        &self.units
    }

    /// Raw records, kept for inspection.
    pub fn records(&self) -> &[StreamEventRecord] {
        &self.records
    }

    pub fn messages(&self) -> &[DebugMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Fold the turn into the single payload the normalizer classifies.
    ///
    /// The last story-shaped unit wins outright. Otherwise objects are
    /// shallow-merged in arrival order (later keys win) and text fragments are
    /// joined with newlines. Returns `None` when nothing usable arrived.
    pub fn payload(&self) -> Option<Value> {
        if let Some(story) = self.units.iter().rev().find(|unit| is_story_shaped(unit)) {
            return Some(story.clone());
        }

        let mut merged = Map::new();
        let mut texts: Vec<String> = Vec::new();
        for unit in &self.units {
            match unit {
                Value::Object(map) if is_text_wrapper(map) => {
                    texts.extend(text_of(unit).map(str::to_string));
                }
                Value::Object(map) => {
                    for (key, value) in map {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Value::String(text) => texts.push(text.clone()),
                Value::Null => {}
                other => texts.push(other.to_string()),
            }
        }
        if let Some(ai) = &self.ai_text {
            texts.push(ai.clone());
        }

        let text = texts.join("\n");
        if !merged.contains_key("chapters") {
            let chapters = chapters_from_text(&text);
            if !chapters.is_empty() {
                merged.insert(
                    "chapters".to_string(),
                    serde_json::to_value(chapters).unwrap_or(Value::Null),
                );
            }
        }

        if merged.is_empty() {
            return (!text.is_empty()).then(|| Value::String(text));
        }
        if !text.is_empty() && !merged.contains_key("text") {
            merged.insert("text".to_string(), Value::String(text));
        }
        Some(Value::Object(merged))
    }
}

fn is_text_wrapper(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.get("text").is_some_and(Value::is_string)
}

fn text_of(payload: &Value) -> Option<&str> {
    payload
        .get("text")
        .or_else(|| payload.get("content"))
        .and_then(Value::as_str)
        .or_else(|| payload.as_str())
}
