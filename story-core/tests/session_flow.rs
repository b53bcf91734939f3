//! End-to-end tests for story sessions over a scripted transport.
//!
//! Run with: `cargo test -p story-core --test session_flow`

use serde_json::json;
use std::sync::Arc;
use story_core::fallback::FALLBACK_STORY_ID;
use story_core::ingest::{FALLBACK_EVENT, RESULT_EVENT};
use story_core::testing::story_payload;
use story_core::{
    MockResponse, MockTransport, NormalizeError, SessionError, StoryConfig, StorySession,
    StoryStore, StreamEventRecord,
};
use tempfile::TempDir;

const PROMPT: &str = "Tell me about volcanoes";

fn json_lines() -> StoryConfig {
    StoryConfig::default().with_event_stream_regime(false)
}

// =============================================================================
// Fallback on cross-origin failure
// =============================================================================

#[tokio::test]
async fn test_cors_failure_resolves_to_fallback_story() {
    let transport = MockTransport::single(MockResponse::fail(
        "Access blocked by CORS policy: No 'Access-Control-Allow-Origin' header",
    ));
    let session = StorySession::new(transport, StoryConfig::default());

    let mut events = Vec::new();
    let story = session
        .submit_prompt(PROMPT, |e| events.push(e.event_type.clone()))
        .await
        .expect("fallback should cover the failure");

    assert_eq!(story.id, FALLBACK_STORY_ID);
    assert_eq!(story.original_prompt, PROMPT);
    let error = story.metadata.error.expect("error should be attached");
    assert!(error.contains("CORS"), "unexpected error text: {error}");
    assert_eq!(events, vec![FALLBACK_EVENT.to_string()]);
}

#[tokio::test]
async fn test_failure_without_fallback_is_surfaced() {
    let transport = MockTransport::single(MockResponse::fail("connection refused"));
    let session = StorySession::new(transport, StoryConfig::default().with_fallback(false));

    let err = session.submit_prompt(PROMPT, |_| {}).await.unwrap_err();
    match err {
        SessionError::Normalize(NormalizeError::Transport(failure)) => {
            assert_eq!(failure.message, "Network error: connection refused");
            assert!(!failure.is_cross_origin());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Line-delimited JSON regime
// =============================================================================

#[tokio::test]
async fn test_single_result_line() {
    let transport = MockTransport::single(MockResponse::text(
        "{\"contents\":[{\"type\":\"result\",\"items\":[{\"title\":\"X\"}]}]}\n",
    ));
    let session = StorySession::new(transport, json_lines());

    let mut events: Vec<StreamEventRecord> = Vec::new();
    let story = session
        .submit_prompt(PROMPT, |e| events.push(e.clone()))
        .await
        .expect("turn should succeed");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, RESULT_EVENT);
    assert_eq!(events[0].payload, json!({ "type": "result", "items": [{ "title": "X" }] }));

    assert_eq!(story.scenes.len(), 2);
    assert_eq!(story.scenes[0].title, "X");
    assert_eq!(story.scenes[1].id, "conclusion");

    let requests = session.ingestor().transport().requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt(), PROMPT);
}

#[tokio::test]
async fn test_streaming_ai_text_replaces() {
    let transport = MockTransport::single(MockResponse::chunks(vec![
        "{\"contents\":[{\"type\":\"ai\",\"text\":\"Vol\"}]}\n",
        "{\"contents\":[{\"type\":\"ai\",\"text\":\"Volcanoes form where magma\"}]}\n",
        "{\"contents\":[{\"type\":\"ai\",\"text\":\"Volcanoes form where magma rises.\"}]}\n",
    ]));
    let session = StorySession::new(transport, json_lines());

    let story = session.submit_prompt(PROMPT, |_| {}).await.unwrap();
    assert_eq!(story.title, "Volcanoes form where magma rises.");
    assert_eq!(story.scenes[0].description, "Volcanoes form where magma rises.");
}

// =============================================================================
// Event-stream regime
// =============================================================================

#[tokio::test]
async fn test_sections_over_event_stream() {
    let transport = MockTransport::single(MockResponse::chunks(vec![
        "event: data\ndata: {\"sections\":[{\"title\":\"S1\",\"content\":\"c1\"},",
        "{\"content\":\"c2\"}]}\n\n",
    ]));
    let session = StorySession::new(transport, StoryConfig::default());

    let story = session.submit_prompt(PROMPT, |_| {}).await.unwrap();
    let titles: Vec<&str> = story.scenes.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["S1", "Section 2", "Conclusion"]);
    assert_eq!(story.scenes[1].description, "c2");
}

#[tokio::test]
async fn test_upstream_story_passes_through() {
    let payload = story_payload("story-upstream", "Volcanoes", 3);
    let body = format!("data: {payload}\n\n");
    let session = StorySession::new(
        MockTransport::single(MockResponse::text(&body)),
        StoryConfig::default(),
    );

    let story = session.submit_prompt(PROMPT, |_| {}).await.unwrap();
    assert_eq!(story.id, "story-upstream");
    assert_eq!(story.scenes.len(), 3);
    assert_eq!(story.original_prompt, PROMPT);
    assert!(!story.metadata.thread_id.is_empty());
}

#[tokio::test]
async fn test_chapter_text_becomes_scenes() {
    let session = StorySession::new(
        MockTransport::single(MockResponse::chunks(vec![
            "data: Chapter 1: The Mountain\n\n",
            "data: It slept for centuries.\n\n",
            "data: Chapter 2: The Eruption\n\n",
        ])),
        StoryConfig::default(),
    );

    let story = session.submit_prompt(PROMPT, |_| {}).await.unwrap();
    assert_eq!(story.scenes.len(), 3);
    assert_eq!(story.scenes[0].title, "Chapter 1: The Mountain");
    assert_eq!(story.scenes[0].description, "It slept for centuries.\n");
    assert_eq!(story.scenes[1].title, "Chapter 2: The Eruption");
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_new_prompt_cancels_in_flight_turn() {
    let transport = Arc::new(MockTransport::new(vec![
        MockResponse::pending(),
        MockResponse::text("data: {\"points\":[\"second turn\"]}\n\n"),
    ]));
    let session = StorySession::new(transport.clone(), StoryConfig::default());

    let mut first_events = 0;
    let (first, second) = tokio::join!(
        session.submit_prompt("first", |_| first_events += 1),
        session.submit_prompt("second", |_| {}),
    );

    assert!(matches!(first, Err(SessionError::Cancelled)));
    assert_eq!(first_events, 0);

    let story = second.expect("second turn should complete");
    assert_eq!(story.original_prompt, "second");
    assert_eq!(story.scenes[0].description, "second turn");
    assert!(!session.is_busy().await);
    assert_eq!(transport.requests().await.len(), 2);
}

#[tokio::test]
async fn test_explicit_cancel() {
    let session = StorySession::new(
        MockTransport::single(MockResponse::pending()),
        StoryConfig::default(),
    );

    let (outcome, cancelled) = tokio::join!(session.submit_prompt(PROMPT, |_| {}), async {
        tokio::task::yield_now().await;
        session.cancel().await
    });

    assert!(cancelled);
    assert!(matches!(outcome, Err(SessionError::Cancelled)));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_story_and_chapters_are_persisted() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let chapters = json!({
        "type": "result",
        "scenes": [
            { "html": "https://pages/1", "gliastar": "abc/1", "article": { "title": "Ash", "content": "..." } }
        ]
    });
    let body = format!("{{\"contents\":[{chapters}]}}\n");
    let session = StorySession::new(MockTransport::single(MockResponse::text(&body)), json_lines())
        .with_store(StoryStore::new(temp_dir.path()));

    assert!(session.last_story().await.unwrap().is_none());
    let story = session.submit_prompt(PROMPT, |_| {}).await.unwrap();

    let saved = session.last_story().await.unwrap().expect("story should be saved");
    assert_eq!(saved, story);

    let saved_chapters = session
        .last_chapters()
        .await
        .unwrap()
        .expect("chapters should be saved");
    assert_eq!(saved_chapters.len(), 1);
    assert_eq!(saved_chapters[0].article.title, "Ash");
    assert_eq!(
        saved_chapters[0].gliastar,
        "https://static-gstudio.gliacloud.com/abc/1"
    );
}

#[tokio::test]
async fn test_failed_turn_without_fallback_keeps_previous_story() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = StoryStore::new(temp_dir.path());
    let session = StorySession::new(
        MockTransport::new(vec![
            MockResponse::text("data: {\"points\":[\"kept\"]}\n\n"),
            MockResponse::fail("connection refused"),
        ]),
        StoryConfig::default().with_fallback(false),
    )
    .with_store(store);

    let first = session.submit_prompt("first", |_| {}).await.unwrap();
    assert!(session.submit_prompt("second", |_| {}).await.is_err());

    let saved = session.last_story().await.unwrap().unwrap();
    assert_eq!(saved.id, first.id);
}
