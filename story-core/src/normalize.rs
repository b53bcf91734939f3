//! The story normalizer: one turn's payload in, exactly one `Story` out.
//!
//! The folded payload is classified once into a [`PayloadShape`]; each
//! branch then builds scenes from its own variant. Any value that does not
//! fit a shape degrades to the next one down, ending at free text.

use crate::fallback::{closing_buttons, fallback_story_for};
use crate::ingest::{IngestFailure, IngestOutcome};
use crate::story::{Scene, Story, StoryMetadata};
use crate::turn::TurnLog;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hard cut on text-derived titles, in characters.
pub const TITLE_LIMIT: usize = 50;

/// Id of the scene closing every story built from a structured payload.
pub const CONCLUSION_SCENE_ID: &str = "conclusion";

const CONCLUSION_TEXT: &str = "Thank you for exploring this information with us.";
const ELLIPSIS: &str = "...";
const INFORMATION_TITLE: &str = "Information";
const UNTITLED: &str = "Untitled Story";

/// Failures that leave a turn without a story.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("no data received from the story stream")]
    NoData,

    #[error("story stream failed: {0}")]
    Transport(IngestFailure),
}

/// The recognized shapes of a folded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// Already a valid story.
    RawStory(Box<Story>),
    SectionsDoc {
        title: Option<String>,
        sections: Vec<Value>,
    },
    ChaptersDoc {
        title: Option<String>,
        chapters: Vec<Value>,
    },
    /// `points`, `items`, or a bare array.
    ItemsDoc {
        title: Option<String>,
        items: Vec<Value>,
    },
    /// An object with none of the recognized arrays.
    ObjectDoc {
        title: Option<String>,
        fields: Map<String, Value>,
    },
    FreeText(String),
}

impl PayloadShape {
    /// Inspect a payload once and tag its shape.
    ///
    /// Strings are parsed as JSON first and classified by what they contain.
    pub fn classify(payload: Value) -> Self {
        match payload {
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::String(inner)) => PayloadShape::FreeText(inner),
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Self::classify(parsed),
                _ => PayloadShape::FreeText(text),
            },
            Value::Object(map) => Self::classify_object(map),
            Value::Array(items) => PayloadShape::ItemsDoc { title: None, items },
            Value::Null => PayloadShape::FreeText(String::new()),
            other => PayloadShape::FreeText(other.to_string()),
        }
    }

    fn classify_object(mut map: Map<String, Value>) -> Self {
        let title = document_title(&map);
        if is_story_object(&map) {
            match serde_json::from_value::<Story>(Value::Object(map.clone())) {
                Ok(story) if story.validate().is_ok() => {
                    return PayloadShape::RawStory(Box::new(story));
                }
                Ok(story) => debug!(error = ?story.validate(), "story-shaped payload is invalid"),
                Err(e) => debug!(error = %e, "story-shaped payload did not deserialize"),
            }
            // Keep the upstream scenes as items.
            if let Some(items) = take_array(&mut map, "scenes") {
                return PayloadShape::ItemsDoc { title, items };
            }
        }

        if let Some(sections) = take_array(&mut map, "sections") {
            return PayloadShape::SectionsDoc { title, sections };
        }
        if let Some(chapters) = take_array(&mut map, "chapters") {
            return PayloadShape::ChaptersDoc { title, chapters };
        }
        if let Some(items) = take_array(&mut map, "points").or_else(|| take_array(&mut map, "items")) {
            return PayloadShape::ItemsDoc { title, items };
        }
        PayloadShape::ObjectDoc { title, fields: map }
    }
}

/// Whether a value looks like a story: string `id` and `title` plus an
/// array of `scenes`.
pub fn is_story_shaped(value: &Value) -> bool {
    value.as_object().is_some_and(is_story_object)
}

fn is_story_object(map: &Map<String, Value>) -> bool {
    map.get("id").and_then(Value::as_str).is_some_and(|id| !id.is_empty())
        && map.get("title").is_some_and(Value::is_string)
        && map.get("scenes").is_some_and(Value::is_array)
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    match map.get(key) {
        Some(Value::Array(_)) => match map.remove(key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn document_title(map: &Map<String, Value>) -> Option<String> {
    ["title", "subject", "name", "topic"]
        .iter()
        .find_map(|key| non_empty_str(map.get(*key)))
        .map(str::to_string)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// A chapter found by scanning text for lines starting with "Chapter".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChapter {
    pub title: String,
    pub content: String,
}

/// Split text on lines whose trimmed form starts with the literal word
/// "Chapter". Non-blank lines after a heading accumulate into its content;
/// text before the first heading is dropped.
pub fn chapters_from_text(text: &str) -> Vec<TextChapter> {
    let mut chapters: Vec<TextChapter> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Chapter") {
            chapters.push(TextChapter {
                title: trimmed.to_string(),
                content: String::new(),
            });
        } else if !trimmed.is_empty() {
            if let Some(current) = chapters.last_mut() {
                current.content.push_str(line);
                current.content.push('\n');
            }
        }
    }
    chapters
}

/// Title from the first line of text, cut hard at [`TITLE_LIMIT`] characters.
/// Falls back to the prompt when the first line is blank.
pub fn text_title(text: &str, prompt: &str) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.trim().is_empty() {
        return prompt_title(prompt);
    }
    truncate_title(first_line)
}

pub fn truncate_title(line: &str) -> String {
    if line.chars().count() > TITLE_LIMIT {
        let mut title: String = line.chars().take(TITLE_LIMIT).collect();
        title.push_str(ELLIPSIS);
        title
    } else {
        line.to_string()
    }
}

fn prompt_title(prompt: &str) -> String {
    if prompt.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        prompt.to_string()
    }
}

/// Folds a finished turn into a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    use_fallback: bool,
}

impl Normalizer {
    pub fn new(use_fallback: bool) -> Self {
        Self { use_fallback }
    }

    pub fn uses_fallback(&self) -> bool {
        self.use_fallback
    }

    /// Produce the story for a turn once its stream has ended.
    ///
    /// A failed stream resolves to the canned story when fallback is on.
    /// With fallback off, whatever arrived before the failure is still
    /// normalized; nothing at all is an error.
    pub fn normalize(
        &self,
        turn: &TurnLog,
        outcome: &IngestOutcome,
        prompt: &str,
    ) -> Result<Story, NormalizeError> {
        if let Err(failure) = outcome {
            if self.use_fallback {
                warn!(error = %failure.message, "substituting fallback story");
                return Ok(fallback_story_for(prompt, Some(failure.message.clone())));
            }
        }

        let Some(payload) = turn.payload() else {
            return match outcome {
                Err(failure) => Err(NormalizeError::Transport(failure.clone())),
                Ok(_) if self.use_fallback => {
                    warn!("no usable data in stream, substituting fallback story");
                    Ok(fallback_story_for(
                        prompt,
                        Some(NormalizeError::NoData.to_string()),
                    ))
                }
                Ok(_) => Err(NormalizeError::NoData),
            };
        };

        let mut story = self.normalize_payload(payload, prompt, &new_thread_id());
        if let Err(failure) = outcome {
            story.metadata.error = Some(failure.message.clone());
        }
        Ok(story)
    }

    /// Turn one payload into a story. Never fails.
    pub fn normalize_payload(&self, payload: Value, prompt: &str, thread_id: &str) -> Story {
        let shape = PayloadShape::classify(payload);
        debug!(shape = shape_name(&shape), "normalizing payload");

        let (title, scenes) = match shape {
            PayloadShape::RawStory(story) => return pass_through(*story, prompt, thread_id),
            PayloadShape::FreeText(text) => {
                let title = text_title(&text, prompt);
                let scene = Scene::new("scene-1", INFORMATION_TITLE, text);
                return new_story(title, vec![scene], prompt, thread_id);
            }
            PayloadShape::SectionsDoc { title, sections } => {
                (title, item_scenes(&sections, "Section"))
            }
            PayloadShape::ChaptersDoc { title, chapters } => {
                (title, item_scenes(&chapters, "Chapter"))
            }
            PayloadShape::ItemsDoc { title, items } => (title, item_scenes(&items, "Point")),
            PayloadShape::ObjectDoc { title, fields } => {
                let description = ["description", "text", "content"]
                    .iter()
                    .find_map(|key| non_empty_str(fields.get(*key)))
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(fields.clone()).to_string());
                (title, vec![Scene::new("scene-1", INFORMATION_TITLE, description)])
            }
        };

        let mut scenes = scenes;
        scenes.push(conclusion_scene());
        let title = title.unwrap_or_else(|| prompt_title(prompt));
        new_story(title, scenes, prompt, thread_id)
    }
}

fn shape_name(shape: &PayloadShape) -> &'static str {
    match shape {
        PayloadShape::RawStory(_) => "story",
        PayloadShape::SectionsDoc { .. } => "sections",
        PayloadShape::ChaptersDoc { .. } => "chapters",
        PayloadShape::ItemsDoc { .. } => "items",
        PayloadShape::ObjectDoc { .. } => "object",
        PayloadShape::FreeText(_) => "text",
    }
}

fn pass_through(mut story: Story, prompt: &str, thread_id: &str) -> Story {
    story.original_prompt = prompt.to_string();
    story.metadata.fill_missing(thread_id);
    story
}

fn item_scenes(items: &[Value], label: &str) -> Vec<Scene> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let n = index + 1;
            let title = non_empty_str(item.get("title"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{label} {n}"));
            Scene::new(format!("scene-{n}"), title, item_description(item))
        })
        .collect()
}

fn item_description(item: &Value) -> String {
    ["content", "description", "text"]
        .iter()
        .find_map(|key| non_empty_str(item.get(*key)))
        .or_else(|| item.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| item.to_string())
}

fn conclusion_scene() -> Scene {
    Scene::new(CONCLUSION_SCENE_ID, "Conclusion", CONCLUSION_TEXT).with_elements(closing_buttons())
}

fn new_story(title: String, scenes: Vec<Scene>, prompt: &str, thread_id: &str) -> Story {
    Story {
        id: format!("story-{}", Uuid::new_v4()),
        title,
        original_prompt: prompt.to_string(),
        scenes,
        metadata: StoryMetadata::new(thread_id),
        extra: Map::new(),
    }
}

fn new_thread_id() -> String {
    Uuid::new_v4().to_string()
}
