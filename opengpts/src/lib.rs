//! Minimal streaming client for the OpenGPTs headless story endpoint.
//!
//! This crate provides:
//! - A reqwest transport that tries the endpoint directly, then relay proxies
//! - Buffered decoding of newline-delimited JSON responses
//! - Buffered decoding of server-sent event responses
//!
//! Decoders work on raw bytes and only decode UTF-8 once a complete unit
//! (a JSON object or an event block) has been buffered.

mod jsonl;
mod sse;

pub use jsonl::{JsonLinesDecoder, QueryUpdate};
pub use sse::{EventStreamDecoder, SseMessage};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// Substrings that mark a transport error as a cross-origin restriction.
const CROSS_ORIGIN_MARKERS: [&str; 3] = ["CORS", "Cross-Origin", "Failed to fetch"];

/// Public relay services, in the order they are tried.
pub const DEFAULT_RELAYS: [&str; 5] = [
    "https://api.allorigins.win/raw?url=",
    "https://proxy.cors.sh/",
    "https://cors.eu.org/",
    "https://corsproxy.io/?",
    "https://cors-anywhere.herokuapp.com/",
];

/// Errors that can occur when talking to the story endpoint.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error text looks like a cross-origin restriction.
    ///
    /// This is advisory text matching, not a structural property of the error.
    pub fn is_cross_origin(&self) -> bool {
        is_cross_origin_message(&self.to_string())
    }
}

/// Classify free-form error text as a cross-origin failure.
pub fn is_cross_origin_message(message: &str) -> bool {
    CROSS_ORIGIN_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// A boxed stream of raw response bytes, in network arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, Error>> + Send>>;

/// Something that can open a streaming response for a request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the stream. Non-success statuses are errors.
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, Error>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, Error> {
        (**self).open(request).await
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A streaming POST request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub url: String,
    pub body: RequestBody,
}

/// JSON body of a streaming request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Event-stream endpoint body: `{"message": ...}`.
    Message { message: String },
    /// Line-delimited JSON endpoint body: `{"query": ...}`.
    Query { query: String },
}

impl StreamRequest {
    /// Request for the event-stream endpoint.
    pub fn message(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Message {
                message: message.into(),
            },
        }
    }

    /// Request for the line-delimited JSON endpoint.
    pub fn query(url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: RequestBody::Query {
                query: query.into(),
            },
        }
    }

    /// The prompt text carried by the body.
    pub fn prompt(&self) -> &str {
        match &self.body {
            RequestBody::Message { message } => message,
            RequestBody::Query { query } => query,
        }
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Overall request timeout. `None` leaves long streams uninterrupted.
    pub timeout: Option<Duration>,

    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,

    /// Relay prefixes tried in order after a failed direct request.
    pub relays: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: Duration::from_secs(30),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl ClientConfig {
    /// Replace the relay list.
    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    /// Disable relay proxies entirely.
    pub fn without_relays(mut self) -> Self {
        self.relays.clear();
        self
    }

    /// Set an overall request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    relays: Vec<String>,
}

impl Client {
    /// Build a client from configuration.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            relays: config.relays,
        })
    }

    /// The relay prefixes this client will try, in order.
    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    async fn send(
        &self,
        url: &str,
        request: &StreamRequest,
        via_relay: bool,
    ) -> Result<reqwest::Response, Error> {
        let response = self
            .http
            .post(url)
            .headers(build_headers(via_relay))
            .json(&request.body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        Ok(response)
    }

    async fn send_via_relays(&self, request: &StreamRequest) -> Option<reqwest::Response> {
        for relay in &self.relays {
            let url = relay_url(relay, &request.url);
            debug!(relay = %relay, "attempting relay proxy");
            match self.send(&url, request, true).await {
                Ok(response) => {
                    info!(relay = %relay, "relay proxy succeeded");
                    return Some(response);
                }
                Err(e) => warn!(relay = %relay, error = %e, "relay proxy failed"),
            }
        }
        None
    }
}

#[async_trait]
impl Transport for Client {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, Error> {
        let response = match self.send(&request.url, request, false).await {
            Ok(response) => response,
            Err(direct) if self.relays.is_empty() => return Err(direct),
            Err(direct) => {
                warn!(error = %direct, "direct request failed, trying relay proxies");
                self.send_via_relays(request).await.ok_or(direct)?
            }
        };

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| Error::Network(e.to_string()))
        });

        Ok(Box::pin(stream))
    }
}

fn build_headers(via_relay: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/event-stream, application/json"),
    );
    if via_relay {
        // Some relays refuse requests without it.
        headers.insert("x-requested-with", HeaderValue::from_static("XMLHttpRequest"));
    }
    headers
}

/// Build the URL a relay expects: the prefix followed by the encoded target.
pub fn relay_url(relay: &str, target: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{relay}{encoded}")
}
