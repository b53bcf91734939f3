//! Story session: the prompt-in, story-out entry point.
//!
//! One session serves one conversation. At most one turn is in flight;
//! submitting a new prompt aborts the previous turn before anything of the
//! new one exists.

use crate::chapters::{extract_chapters, StoryChapter};
use crate::config::{ConfigError, StoryConfig};
use crate::fallback::fallback_story_for;
use crate::ingest::{IngestFailure, Ingestor, StreamEventRecord};
use crate::normalize::{NormalizeError, Normalizer};
use crate::persist::{PersistError, StoryStore};
use crate::story::Story;
use crate::turn::TurnLog;
use futures::future::{AbortHandle, Abortable};
use opengpts::{Client, Transport};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Errors from StorySession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("turn was cancelled")]
    Cancelled,

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("client error: {0}")]
    Client(#[from] opengpts::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Whether the turn failed on a cross-origin restriction, so the caller
    /// can offer a retry through a relay.
    pub fn is_cross_origin(&self) -> bool {
        matches!(self, SessionError::Normalize(NormalizeError::Transport(f)) if f.is_cross_origin())
    }
}

/// The result of one completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryTurn {
    pub story: Story,

    /// The stream failure the story stands in for or was built around.
    pub failure: Option<IngestFailure>,
}

impl StoryTurn {
    /// Whether the stream failed on a cross-origin restriction.
    pub fn is_cross_origin(&self) -> bool {
        self.failure.as_ref().is_some_and(IngestFailure::is_cross_origin)
    }
}

/// A conversation with the story endpoint.
pub struct StorySession<T> {
    ingestor: Ingestor<T>,
    normalizer: Normalizer,
    store: Option<StoryStore>,
    /// The in-flight turn, if any.
    current: Mutex<Option<(u64, AbortHandle)>>,
    turns: AtomicU64,
}

impl StorySession<Client> {
    /// Build a session over the HTTP client.
    pub fn connect(config: StoryConfig) -> Result<Self, SessionError> {
        let client = Client::new(config.client_config())?;
        Ok(Self::new(client, config))
    }

    /// Build a session from `STORY_*` environment variables.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::connect(StoryConfig::from_env()?)
    }
}

impl<T: Transport> StorySession<T> {
    pub fn new(transport: T, config: StoryConfig) -> Self {
        let normalizer = Normalizer::new(config.use_fallback);
        Self {
            ingestor: Ingestor::new(transport, config),
            normalizer,
            store: None,
            current: Mutex::new(None),
            turns: AtomicU64::new(0),
        }
    }

    /// Persist each turn's story and chapters into `store`.
    pub fn with_store(mut self, store: StoryStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &StoryConfig {
        self.ingestor.config()
    }

    pub fn ingestor(&self) -> &Ingestor<T> {
        &self.ingestor
    }

    pub fn store(&self) -> Option<&StoryStore> {
        self.store.as_ref()
    }

    /// Run one turn: stream the prompt, fold the records, persist and return
    /// the story.
    ///
    /// `on_event` sees every record in arrival order. A turn superseded by a
    /// newer submission, or stopped with [`cancel`](Self::cancel), resolves
    /// to [`SessionError::Cancelled`] and nothing from it is folded.
    pub async fn submit_prompt<F>(&self, prompt: &str, on_event: F) -> Result<Story, SessionError>
    where
        F: FnMut(&StreamEventRecord),
    {
        self.run_turn(prompt, on_event).await.map(|turn| turn.story)
    }

    /// Like [`submit_prompt`](Self::submit_prompt), also reporting the stream
    /// failure behind a fallback or partial story.
    pub async fn run_turn<F>(&self, prompt: &str, mut on_event: F) -> Result<StoryTurn, SessionError>
    where
        F: FnMut(&StreamEventRecord),
    {
        if prompt.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let (turn_id, registration) = self.begin_turn().await;

        let config = self.config();
        if config.local_mode && config.use_fallback {
            info!(turn_id, "local mode, answering with fallback story");
            self.finish_turn(turn_id).await?;
            let story = fallback_story_for(prompt, None);
            self.persist(&story, &[]).await;
            return Ok(StoryTurn {
                story,
                failure: None,
            });
        }

        let mut turn = TurnLog::new();
        let ingest = self.ingestor.ingest(prompt, |record| {
            on_event(&record);
            turn.record(record);
        });
        let outcome = Abortable::new(ingest, registration).await;

        self.finish_turn(turn_id).await?;
        let outcome = outcome.map_err(|_| {
            info!(turn_id, "turn aborted");
            SessionError::Cancelled
        })?;

        let story = self.normalizer.normalize(&turn, &outcome, prompt)?;
        let chapters = extract_chapters(&turn);
        info!(
            turn_id,
            story_id = %story.id,
            scenes = story.scenes.len(),
            chapters = chapters.len(),
            "turn complete"
        );

        self.persist(&story, &chapters).await;
        Ok(StoryTurn {
            story,
            failure: outcome.err(),
        })
    }

    /// Register a new turn, aborting the one in flight.
    async fn begin_turn(&self) -> (u64, futures::future::AbortRegistration) {
        let turn_id = self.turns.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, registration) = AbortHandle::new_pair();

        let mut current = self.current.lock().await;
        if let Some((previous, old)) = current.replace((turn_id, handle)) {
            info!(previous, turn_id, "aborting in-flight turn");
            old.abort();
        }
        (turn_id, registration)
    }

    /// Clear the in-flight slot if it still belongs to `turn_id`. A turn that
    /// lost its slot was superseded or cancelled.
    async fn finish_turn(&self, turn_id: u64) -> Result<(), SessionError> {
        let mut current = self.current.lock().await;
        match current.as_ref() {
            Some((id, _)) if *id == turn_id => {
                *current = None;
                Ok(())
            }
            _ => Err(SessionError::Cancelled),
        }
    }

    async fn persist(&self, story: &Story, chapters: &[StoryChapter]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save_story(story).await {
            warn!(error = %e, "failed to persist story");
        }
        if !chapters.is_empty() {
            if let Err(e) = store.save_chapters(chapters).await {
                warn!(error = %e, "failed to persist chapters");
            }
        }
    }

    /// Abort the in-flight turn. Returns whether there was one.
    pub async fn cancel(&self) -> bool {
        match self.current.lock().await.take() {
            Some((turn_id, handle)) => {
                info!(turn_id, "cancelling turn");
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Whether a turn is in flight.
    pub async fn is_busy(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// The last persisted story.
    pub async fn last_story(&self) -> Result<Option<Story>, SessionError> {
        match &self.store {
            Some(store) => Ok(store.load_story().await?),
            None => Ok(None),
        }
    }

    /// The last persisted chapters.
    pub async fn last_chapters(&self) -> Result<Option<Vec<StoryChapter>>, SessionError> {
        match &self.store {
            Some(store) => Ok(store.load_chapters().await?),
            None => Ok(None),
        }
    }
}
