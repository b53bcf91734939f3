//! The canonical story document.
//!
//! A `Story` is what every conversation turn resolves to, whether it came
//! straight from the endpoint, was synthesized from loose payloads, or is the
//! canned fallback. Field names follow the upstream JSON so a well-formed
//! upstream story deserializes directly.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Action id for the "restart tour" button.
pub const ACTION_RESTART_TOUR: &str = "restartTour";

/// Action id for the "ask a new question" button.
pub const ACTION_NEW_PROMPT: &str = "newPrompt";

/// Ways a story can break its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidStory {
    #[error("story has no scenes")]
    NoScenes,

    #[error("duplicate scene id: {0}")]
    DuplicateSceneId(String),
}

/// A normalized story derived from one prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,

    /// The user's input, always preserved verbatim.
    #[serde(default, deserialize_with = "null_as_default")]
    pub original_prompt: String,

    /// Scene 0 is the intro, the last scene is the conclusion.
    pub scenes: Vec<Scene>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: StoryMetadata,

    /// Upstream fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    /// Check that scenes are non-empty and scene ids are unique.
    pub fn validate(&self) -> Result<(), InvalidStory> {
        if self.scenes.is_empty() {
            return Err(InvalidStory::NoScenes);
        }
        let mut seen = HashSet::new();
        for scene in &self.scenes {
            if !seen.insert(scene.id.as_str()) {
                return Err(InvalidStory::DuplicateSceneId(scene.id.clone()));
            }
        }
        Ok(())
    }

    /// Look up a scene by id.
    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id == id)
    }

    /// The intro scene.
    pub fn hero(&self) -> Option<&Scene> {
        self.scenes.first()
    }

    /// The closing scene.
    pub fn conclusion(&self) -> Option<&Scene> {
        self.scenes.last()
    }
}

/// Bookkeeping attached to a story.
///
/// Reads the thread id from `thread_id` or `threadId`; when both are present
/// `thread_id` wins. Always writes `thread_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMetadata")]
pub struct StoryMetadata {
    /// RFC 3339 creation time.
    #[serde(rename = "createdAt")]
    pub created_at: String,

    pub tags: BTreeSet<String>,

    #[serde(rename = "thread_id")]
    pub thread_id: String,

    /// Set when the story stands in for a failed turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct WireMetadata {
    #[serde(rename = "createdAt", default, deserialize_with = "null_as_default")]
    created_at: String,

    #[serde(default, deserialize_with = "null_as_default")]
    tags: BTreeSet<String>,

    #[serde(rename = "thread_id", default)]
    thread_id: Option<String>,

    #[serde(rename = "threadId", default)]
    camel_thread_id: Option<String>,

    #[serde(default)]
    error: Option<String>,

    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<WireMetadata> for StoryMetadata {
    fn from(wire: WireMetadata) -> Self {
        Self {
            created_at: wire.created_at,
            tags: wire.tags,
            thread_id: wire.thread_id.or(wire.camel_thread_id).unwrap_or_default(),
            error: wire.error,
            extra: wire.extra,
        }
    }
}

impl StoryMetadata {
    /// Fresh metadata stamped with the current time.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            created_at: now_rfc3339(),
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    /// Fill in the thread id and creation time only where they are missing.
    pub fn fill_missing(&mut self, thread_id: &str) {
        if self.thread_id.is_empty() {
            self.thread_id = thread_id.to_string();
        }
        if self.created_at.is_empty() {
            self.created_at = now_rfc3339();
        }
    }
}

/// One displayable page of a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    /// Free text, possibly several paragraphs.
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    #[serde(
        rename = "interactiveElements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub interactive_elements: Option<Vec<InteractiveElement>>,

    /// Rendering payloads and anything else the presentation layer reads.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            interactive_elements: None,
            extra: Map::new(),
        }
    }

    pub fn with_elements(mut self, elements: Vec<InteractiveElement>) -> Self {
        self.interactive_elements = Some(elements);
        self
    }

    /// Attach an opaque rendering payload under `data`.
    pub fn with_data(mut self, data: Value) -> Self {
        self.extra.insert("data".to_string(), data);
        self
    }

    /// Interactive elements, empty when none were given.
    pub fn elements(&self) -> &[InteractiveElement] {
        self.interactive_elements.as_deref().unwrap_or_default()
    }
}

/// A control rendered inside a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,
}

impl InteractiveElement {
    pub fn button(
        id: impl Into<String>,
        label: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind: "button".to_string(),
            id: id.into(),
            label: label.into(),
            action: action.into(),
        }
    }

    /// Interpret the opaque action string.
    pub fn parsed_action(&self) -> SceneAction {
        SceneAction::parse(&self.action)
    }
}

/// Commands the presentation layer understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneAction {
    RestartTour,
    NewPrompt,
    /// Anything else. The presentation layer treats it as a no-op.
    Unrecognized(String),
}

impl SceneAction {
    pub fn parse(action: &str) -> Self {
        match action {
            ACTION_RESTART_TOUR => SceneAction::RestartTour,
            ACTION_NEW_PROMPT => SceneAction::NewPrompt,
            other => SceneAction::Unrecognized(other.to_string()),
        }
    }
}

/// Read `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
