//! Testing utilities for story sessions.
//!
//! This module provides tools for integration testing:
//! - `MockTransport` for deterministic streams without network access
//! - `MockResponse` for scripting what each stream delivers
//! - `story_payload` for building Story-shaped JSON

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use opengpts::{ByteStream, Error, StreamRequest, Transport};
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A scripted response for one `open` call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Deliver these chunks, then close cleanly.
    Chunks(Vec<Vec<u8>>),
    /// Fail to open.
    Fail(String),
    /// Deliver these chunks, then fail mid-stream.
    FailAfter { chunks: Vec<Vec<u8>>, error: String },
    /// Open, then never deliver anything.
    Pending,
}

impl MockResponse {
    /// The whole body as one chunk.
    pub fn text(body: &str) -> Self {
        Self::Chunks(vec![body.as_bytes().to_vec()])
    }

    /// Each element is delivered as its own network chunk.
    pub fn chunks<S: AsRef<[u8]>>(chunks: Vec<S>) -> Self {
        Self::Chunks(to_bytes(chunks))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn fail_after<S: AsRef<[u8]>>(chunks: Vec<S>, message: impl Into<String>) -> Self {
        Self::FailAfter {
            chunks: to_bytes(chunks),
            error: message.into(),
        }
    }

    pub fn pending() -> Self {
        Self::Pending
    }
}

fn to_bytes<S: AsRef<[u8]>>(chunks: Vec<S>) -> Vec<Vec<u8>> {
    chunks.iter().map(|c| c.as_ref().to_vec()).collect()
}

/// A transport that plays back scripted responses in order.
///
/// Once the script runs out, every stream opens and closes empty.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single(response: MockResponse) -> Self {
        Self::new(vec![response])
    }

    /// Add a response to the end of the script.
    pub async fn queue(&self, response: MockResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Every request opened so far, oldest first.
    pub async fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, Error> {
        self.requests.lock().await.push(request.clone());

        let next = self.responses.lock().await.pop_front();
        let stream: ByteStream = match next {
            None => Box::pin(stream::empty::<Chunk>()),
            Some(MockResponse::Chunks(chunks)) => Box::pin(delivered(chunks)),
            Some(MockResponse::Fail(message)) => return Err(Error::Network(message)),
            Some(MockResponse::FailAfter { chunks, error }) => Box::pin(
                delivered(chunks).chain(stream::once(async move { Err(Error::Network(error)) })),
            ),
            Some(MockResponse::Pending) => Box::pin(stream::pending::<Chunk>()),
        };
        Ok(stream)
    }
}

type Chunk = Result<Vec<u8>, Error>;

fn delivered(chunks: Vec<Vec<u8>>) -> impl futures::Stream<Item = Chunk> + Send {
    stream::iter(chunks.into_iter().map(Ok::<Vec<u8>, Error>))
}

/// A Story-shaped payload with `scenes` numbered from 1.
pub fn story_payload(id: &str, title: &str, scenes: usize) -> Value {
    let scenes: Vec<Value> = (1..=scenes)
        .map(|n| {
            json!({
                "id": format!("scene-{n}"),
                "title": format!("Scene {n}"),
                "description": format!("Description {n}"),
            })
        })
        .collect();
    json!({ "id": id, "title": title, "scenes": scenes })
}
