//! Configuration for ingestion and normalization.
//!
//! Behavior toggles are explicit fields passed to constructors rather than
//! process-wide flags.

use opengpts::{ClientConfig, DEFAULT_RELAYS};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://gtc---genv-opengpts-al23s7k26q-de.a.run.app";
pub const DEFAULT_STREAM_PATH: &str = "/headless/stream";
pub const DEFAULT_QUERY_URL: &str = "https://v0-0-43b18---genv-opengpts-al23s7k26q-de.a.run.app/";

/// Errors reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} (expected true/false)")]
    InvalidFlag { name: &'static str, value: String },
}

/// Where the story endpoints live.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// Base URL of the event-stream service.
    pub base_url: String,

    /// Path of the event-stream endpoint under `base_url`.
    pub stream_path: String,

    /// Full URL of the line-delimited JSON endpoint.
    pub query_url: String,

    /// Relay prefixes, tried in this order. Treated as configuration: the
    /// services are third parties and may disappear.
    pub relays: Vec<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            query_url: DEFAULT_QUERY_URL.to_string(),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl EndpointConfig {
    /// Full URL of the event-stream endpoint.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.stream_path.trim_start_matches('/')
        )
    }
}

/// Behavior of one story session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryConfig {
    /// Substitute the canned story when live data is unavailable.
    pub use_fallback: bool,

    /// Retry through relay proxies when the direct request fails.
    pub use_relay_proxies: bool,

    /// Use the event-stream endpoint; otherwise the line-delimited JSON one.
    pub use_event_stream_regime: bool,

    /// Skip the network and answer with the canned story. Only honored when
    /// `use_fallback` is also set.
    pub local_mode: bool,

    pub endpoint: EndpointConfig,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            use_fallback: true,
            use_relay_proxies: true,
            use_event_stream_regime: true,
            local_mode: false,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl StoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the environment on top of the defaults.
    ///
    /// Recognized: `STORY_API_URL`, `STORY_QUERY_URL`, `STORY_USE_FALLBACK`,
    /// `STORY_USE_RELAYS`, `STORY_EVENT_STREAM`, `STORY_LOCAL_MODE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("STORY_API_URL") {
            config.endpoint.base_url = url;
        }
        if let Some(url) = lookup("STORY_QUERY_URL") {
            config.endpoint.query_url = url;
        }

        let flag = |name: &'static str, current: bool| -> Result<bool, ConfigError> {
            match lookup(name) {
                Some(value) => parse_flag(name, &value),
                None => Ok(current),
            }
        };
        config.use_fallback = flag("STORY_USE_FALLBACK", config.use_fallback)?;
        config.use_relay_proxies = flag("STORY_USE_RELAYS", config.use_relay_proxies)?;
        config.use_event_stream_regime =
            flag("STORY_EVENT_STREAM", config.use_event_stream_regime)?;
        config.local_mode = flag("STORY_LOCAL_MODE", config.local_mode)?;

        Ok(config)
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.use_fallback = enabled;
        self
    }

    pub fn with_relay_proxies(mut self, enabled: bool) -> Self {
        self.use_relay_proxies = enabled;
        self
    }

    pub fn with_event_stream_regime(mut self, enabled: bool) -> Self {
        self.use_event_stream_regime = enabled;
        self
    }

    pub fn with_local_mode(mut self, enabled: bool) -> Self {
        self.local_mode = enabled;
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// HTTP client settings implied by this config.
    pub fn client_config(&self) -> ClientConfig {
        let relays = if self.use_relay_proxies {
            self.endpoint.relays.clone()
        } else {
            Vec::new()
        };
        ClientConfig::default().with_relays(relays)
    }
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoryConfig::default();
        assert!(config.use_fallback);
        assert!(config.use_relay_proxies);
        assert!(config.use_event_stream_regime);
        assert!(!config.local_mode);
        assert_eq!(
            config.endpoint.stream_url(),
            format!("{DEFAULT_BASE_URL}/headless/stream")
        );
    }

    #[test]
    fn test_relays_follow_toggle() {
        let config = StoryConfig::default();
        assert_eq!(config.client_config().relays.len(), DEFAULT_RELAYS.len());

        let config = config.with_relay_proxies(false);
        assert!(config.client_config().relays.is_empty());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = StoryConfig::from_lookup(lookup(&[
            ("STORY_API_URL", "http://localhost:8100/"),
            ("STORY_USE_FALLBACK", "false"),
            ("STORY_EVENT_STREAM", "0"),
            ("STORY_LOCAL_MODE", "YES"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.stream_url(), "http://localhost:8100/headless/stream");
        assert!(!config.use_fallback);
        assert!(!config.use_event_stream_regime);
        assert!(config.local_mode);
        assert!(config.use_relay_proxies);
    }

    #[test]
    fn test_from_lookup_rejects_bad_flag() {
        let err = StoryConfig::from_lookup(lookup(&[("STORY_USE_RELAYS", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFlag { name: "STORY_USE_RELAYS", .. }));
    }
}
