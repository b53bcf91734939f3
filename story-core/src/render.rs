//! Typed, read-only view of a scene's rendering payload.
//!
//! Payloads stay opaque inside `Scene::extra` and pass through untouched.
//! This view only classifies them for the presentation layer; scripts are
//! exposed as text and never evaluated here.

use crate::story::Scene;
use serde::Deserialize;
use serde_json::Value;

/// What a scene asks the presentation layer to draw.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPayload {
    /// A 3D-scene script, handed to a sandboxed renderer as data.
    Script(String),
    /// A still image.
    Image(String),
    /// Structured building facts.
    Building(BuildingAttributes),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingAttributes {
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub floors: Option<u32>,
    #[serde(default)]
    pub completion_year: Option<i32>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Scene {
    /// Classify the rendering payload. Scripts win over images, images over
    /// building facts.
    pub fn render_payload(&self) -> Option<RenderPayload> {
        let data = self.extra.get("data");
        let script = data
            .and_then(|d| d.get("threejs_code"))
            .or_else(|| self.extra.get("threeJsCode"))
            .and_then(non_empty);
        if let Some(script) = script {
            return Some(RenderPayload::Script(script.to_string()));
        }

        let data = data?;
        if let Some(url) = data.get("imageUrl").and_then(non_empty) {
            return Some(RenderPayload::Image(url.to_string()));
        }

        if data.get("height").is_some() {
            return serde_json::from_value(data.clone())
                .ok()
                .map(RenderPayload::Building);
        }

        None
    }

    /// Display copy, preferring `data.content_copy` over the description.
    pub fn display_copy(&self) -> &str {
        self.extra
            .get("data")
            .and_then(|d| d.get("content_copy"))
            .and_then(non_empty)
            .unwrap_or(&self.description)
    }
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().filter(|s| !s.is_empty())
}
