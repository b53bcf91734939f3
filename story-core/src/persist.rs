//! Story persistence for direct page loads.
//!
//! A small key-value store, one JSON file per key. The session writes the
//! last good story and its chapters after every successful turn; the
//! navigation layer reads them back. Last writer wins.

use crate::chapters::StoryChapter;
use crate::story::{now_rfc3339, Story};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Key of the last story's chapters.
pub const CHAPTERS_KEY: &str = "storyChapters";

/// Key of the last story.
pub const LAST_STORY_KEY: &str = "lastStory";

/// Current envelope version.
const STORE_VERSION: u32 = 1;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// What is written for every key.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    saved_at: String,
    value: T,
}

/// Directory-backed key-value store.
#[derive(Debug, Clone)]
pub struct StoryStore {
    dir: PathBuf,
}

impl StoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }

    /// Read a value. A missing key is `Ok(None)`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, PersistError> {
        let content = match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope<Value> = serde_json::from_str(&content)?;
        if envelope.version != STORE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: STORE_VERSION,
                found: envelope.version,
            });
        }
        Ok(Some(serde_json::from_value(envelope.value)?))
    }

    /// Write a value, replacing whatever the key held.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), PersistError> {
        let envelope = Envelope {
            version: STORE_VERSION,
            saved_at: now_rfc3339(),
            value,
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        debug!(key, path = %path.display(), "persisted");
        Ok(())
    }

    /// Delete a key. Deleting a missing key is not an error.
    pub async fn remove(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_story(&self, story: &Story) -> Result<(), PersistError> {
        self.put(LAST_STORY_KEY, story).await
    }

    pub async fn load_story(&self) -> Result<Option<Story>, PersistError> {
        self.get(LAST_STORY_KEY).await
    }

    pub async fn save_chapters(&self, chapters: &[StoryChapter]) -> Result<(), PersistError> {
        self.put(CHAPTERS_KEY, &chapters).await
    }

    /// Load chapters with their video references normalized.
    pub async fn load_chapters(&self) -> Result<Option<Vec<StoryChapter>>, PersistError> {
        let chapters: Option<Vec<StoryChapter>> = self.get(CHAPTERS_KEY).await?;
        Ok(chapters.map(|mut chapters| {
            chapters.iter_mut().for_each(StoryChapter::normalize_video);
            chapters
        }))
    }
}
