//! Storybook chapters carried by result units.
//!
//! Some result units list `scenes` that are chapters rather than story
//! scenes: an HTML page, a narrated video and an article. The latest such
//! list seen in a turn is the one that counts.

use crate::ingest::{StreamEventRecord, AI_EVENT, RESULT_EVENT};
use crate::normalize::is_story_shaped;
use crate::turn::TurnLog;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Host prepended to bare video references.
pub const VIDEO_HOST: &str = "https://static-gstudio.gliacloud.com/";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoryChapter {
    #[serde(default)]
    pub html: String,

    /// Narrated video for the chapter.
    #[serde(default)]
    pub gliastar: String,

    #[serde(default)]
    pub article: Article,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl StoryChapter {
    /// Rewrite the video reference into a full URL.
    pub fn normalize_video(&mut self) {
        self.gliastar = normalize_video_ref(&self.gliastar);
    }
}

/// `.webm` files and `https://` URLs are kept; anything else non-empty is a
/// path on [`VIDEO_HOST`].
pub fn normalize_video_ref(reference: &str) -> String {
    if reference.is_empty() || reference.ends_with(".webm") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!("{VIDEO_HOST}{reference}")
    }
}

/// Chapters carried by one unit, if any.
///
/// Looks at the unit itself when it is a result with `scenes`, then at
/// result items nested under `content` or `contents`. The first nested item
/// may leave out its `type`. Story-shaped values are never chapters.
pub fn chapters_from_unit(unit: &Value) -> Option<Vec<StoryChapter>> {
    chapters_in(unit, false)
}

/// Chapters carried by one record. A `result` record counts as a result
/// even when its payload has no `type`.
pub fn chapters_from_record(record: &StreamEventRecord) -> Option<Vec<StoryChapter>> {
    chapters_in(&record.payload, record.event_type == RESULT_EVENT)
}

fn chapters_in(unit: &Value, result_record: bool) -> Option<Vec<StoryChapter>> {
    let mut found = chapter_list(unit, result_record);
    for key in ["content", "contents"] {
        let Some(items) = unit.get(key).and_then(Value::as_array) else {
            continue;
        };
        for (index, item) in items.iter().enumerate() {
            if let Some(chapters) = chapter_list(item, index == 0) {
                found = Some(chapters);
            }
        }
    }
    found
}

/// `untyped_is_result` decides for values without a `type`.
fn chapter_list(value: &Value, untyped_is_result: bool) -> Option<Vec<StoryChapter>> {
    let is_result = match value.get("type") {
        Some(kind) => kind.as_str() == Some("result"),
        None => untyped_is_result,
    };
    if !is_result || is_story_shaped(value) {
        return None;
    }
    let scenes = value.get("scenes")?.as_array()?;

    let chapters = scenes
        .iter()
        .filter_map(|scene| match StoryChapter::deserialize(scene) {
            Ok(mut chapter) => {
                chapter.normalize_video();
                Some(chapter)
            }
            Err(e) => {
                warn!(error = %e, "skipping malformed chapter");
                None
            }
        })
        .collect();
    Some(chapters)
}

/// The latest chapter list in the turn, empty when none arrived.
pub fn extract_chapters(turn: &TurnLog) -> Vec<StoryChapter> {
    let chapters = turn
        .records()
        .iter()
        .filter(|record| record.event_type != AI_EVENT)
        .filter_map(chapters_from_record)
        .last()
        .unwrap_or_default();
    debug!(count = chapters.len(), "extracted chapters");
    chapters
}
