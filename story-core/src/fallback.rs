//! The canned story used whenever live data is unavailable.

use crate::story::{
    InteractiveElement, Scene, Story, StoryMetadata, ACTION_NEW_PROMPT, ACTION_RESTART_TOUR,
};
use serde_json::{json, Map, Value};

/// Id of the canned story.
pub const FALLBACK_STORY_ID: &str = "buildings-story-1";

const FALLBACK_THREAD_ID: &str = "dummy-thread-123";

lazy_static::lazy_static! {
    static ref TALLEST_BUILDINGS: Story = tallest_buildings();
}

/// The canned story, exactly as committed.
pub fn fallback_story() -> Story {
    TALLEST_BUILDINGS.clone()
}

/// The canned story standing in for a turn: prompt preserved, error attached.
pub fn fallback_story_for(prompt: &str, error: Option<String>) -> Story {
    let mut story = fallback_story();
    story.original_prompt = prompt.to_string();
    story.metadata.error = error;
    story
}

/// The canned story as a raw payload, the way the stream would deliver it.
pub fn fallback_payload() -> Value {
    serde_json::to_value(&*TALLEST_BUILDINGS).unwrap_or(Value::Null)
}

/// The two closing buttons every synthesized story ends with.
pub fn closing_buttons() -> Vec<InteractiveElement> {
    vec![
        InteractiveElement::button("restart-tour", "Restart Tour", ACTION_RESTART_TOUR),
        InteractiveElement::button("new-prompt", "Ask a New Question", ACTION_NEW_PROMPT),
    ]
}

fn building(height: f64, floors: u32, completion_year: i32, location: &str) -> Value {
    json!({
        "height": height,
        "floors": floors,
        "completionYear": completion_year,
        "location": location,
    })
}

fn tallest_buildings() -> Story {
    let scenes = vec![
        Scene::new(
            "scene-1",
            "Introduction",
            "In the race to touch the sky, humans have constructed increasingly taller \
             structures throughout history. These architectural marvels represent both \
             technological achievement and cultural ambition.",
        ),
        Scene::new(
            "scene-2",
            "Burj Khalifa",
            "Standing at 828 meters (2,717 feet), the Burj Khalifa in Dubai has been the \
             world's tallest building since its completion in 2010. Its design was inspired \
             by the Hymenocallis flower and follows Islamic architecture principles.",
        )
        .with_data(building(828.0, 163, 2010, "Dubai, United Arab Emirates")),
        Scene::new(
            "scene-3",
            "Merdeka 118",
            "Completed in 2022, the Merdeka 118 in Kuala Lumpur, Malaysia reaches 678.9 \
             meters (2,227 feet) and is currently the second-tallest building in the world.",
        )
        .with_data(building(678.9, 118, 2022, "Kuala Lumpur, Malaysia")),
        Scene::new(
            "scene-4",
            "Shanghai Tower",
            "The Shanghai Tower twists approximately one degree per floor to reduce wind \
             loads, standing 632 meters (2,073 feet) tall as China's tallest building and \
             the third tallest in the world.",
        )
        .with_data(building(632.0, 128, 2015, "Shanghai, China")),
        Scene::new(
            "conclusion",
            "Conclusion",
            "As technology advances, we can expect even taller skyscrapers to emerge. Future \
             buildings may incorporate new materials, sustainable design principles, and \
             innovative architectural approaches to continue pushing the boundaries of \
             what's possible.",
        )
        .with_elements(closing_buttons()),
    ];

    let mut metadata = StoryMetadata::new(FALLBACK_THREAD_ID);
    metadata.tags = ["architecture", "skyscrapers", "buildings", "world records"]
        .into_iter()
        .map(String::from)
        .collect();

    Story {
        id: FALLBACK_STORY_ID.to_string(),
        title: "The World's Tallest Buildings".to_string(),
        original_prompt: "Tell me about the world's tallest buildings".to_string(),
        scenes,
        metadata,
        extra: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderPayload;

    #[test]
    fn test_fallback_story_is_valid() {
        let story = fallback_story();
        assert!(story.validate().is_ok());
        assert_eq!(story.scenes.len(), 5);
        assert_eq!(story.conclusion().unwrap().id, "conclusion");
        assert_eq!(story.conclusion().unwrap().elements().len(), 2);
    }

    #[test]
    fn test_fallback_story_for_prompt() {
        let story = fallback_story_for("Tell me about volcanoes", Some("offline".to_string()));
        assert_eq!(story.original_prompt, "Tell me about volcanoes");
        assert_eq!(story.metadata.error.as_deref(), Some("offline"));
        assert_eq!(story.id, FALLBACK_STORY_ID);
    }

    #[test]
    fn test_fallback_is_stable_across_calls() {
        assert_eq!(fallback_story(), fallback_story());
        assert_eq!(fallback_payload()["id"], FALLBACK_STORY_ID);
    }

    #[test]
    fn test_buildings_carry_attributes() {
        let story = fallback_story();
        assert!(matches!(
            story.scenes[1].render_payload(),
            Some(RenderPayload::Building(_))
        ));
    }
}
