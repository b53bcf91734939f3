//! Streaming story engine over the OpenGPTs endpoint.
//!
//! This crate provides:
//! - The `Story` document and the canned fallback story
//! - A stream ingestor for both wire formats
//! - A normalizer turning loosely shaped payloads into one `Story`
//! - Storybook chapter extraction and persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use story_core::{StoryConfig, StorySession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = StorySession::connect(StoryConfig::from_env()?)?;
//!
//!     let story = session
//!         .submit_prompt("Tell me about volcanoes", |event| {
//!             println!("{}: {}", event.event_type, event.payload);
//!         })
//!         .await?;
//!
//!     for scene in &story.scenes {
//!         println!("{}: {}", scene.title, scene.description);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chapters;
pub mod config;
pub mod fallback;
pub mod ingest;
pub mod normalize;
pub mod persist;
pub mod render;
pub mod session;
pub mod story;
pub mod testing;
pub mod turn;

// Primary public API
pub use chapters::{extract_chapters, StoryChapter};
pub use config::{ConfigError, EndpointConfig, StoryConfig};
pub use fallback::{fallback_story, fallback_story_for};
pub use ingest::{FailureKind, IngestFailure, IngestOutcome, Ingestor, Regime, StreamEventRecord};
pub use normalize::{NormalizeError, Normalizer, PayloadShape};
pub use persist::{PersistError, StoryStore};
pub use render::{BuildingAttributes, RenderPayload};
pub use session::{SessionError, StorySession, StoryTurn};
pub use story::{InteractiveElement, Scene, SceneAction, Story, StoryMetadata};
pub use testing::{MockResponse, MockTransport};
pub use turn::TurnLog;
