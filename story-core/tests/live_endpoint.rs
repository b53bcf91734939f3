//! Integration tests that call the real story endpoint.
//!
//! Endpoint overrides are read from `STORY_*` variables (via .env file or
//! environment). Run with: `cargo test -p story-core --test live_endpoint -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - Test failures when the endpoint is unreachable
//! - Slow test runs (generation takes many seconds)

use story_core::{StoryConfig, StorySession};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

#[tokio::test]
#[ignore] // Run with: cargo test -p story-core --test live_endpoint -- --ignored
async fn test_live_prompt_produces_story() {
    setup();
    let config = StoryConfig::from_env()
        .expect("STORY_* variables should parse")
        .with_fallback(false);
    let session = StorySession::connect(config).expect("Failed to build client");

    let mut events = 0;
    let story = session
        .submit_prompt("Tell me about volcanoes", |_| events += 1)
        .await
        .expect("live turn should produce a story");

    println!("Received {events} events, story '{}' with {} scenes", story.title, story.scenes.len());
    assert!(events > 0);
    assert!(story.validate().is_ok());
    assert_eq!(story.original_prompt, "Tell me about volcanoes");
}

#[tokio::test]
#[ignore]
async fn test_live_json_lines_regime() {
    setup();
    let config = StoryConfig::from_env()
        .expect("STORY_* variables should parse")
        .with_event_stream_regime(false)
        .with_fallback(false);
    let session = StorySession::connect(config).expect("Failed to build client");

    match session.submit_prompt("What are the tallest buildings?", |_| {}).await {
        Ok(story) => assert!(story.validate().is_ok()),
        Err(e) if e.is_cross_origin() => eprintln!("Endpoint refused the origin: {e}"),
        Err(e) => panic!("live turn failed: {e}"),
    }
}
