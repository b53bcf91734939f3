//! The stream ingestor: one network stream in, ordered event records out.
//!
//! The ingestor owns the connection for one turn and alone decides when the
//! stream is done. Records are handed to the caller synchronously, in
//! arrival order, as soon as each unit is decoded.

use crate::config::StoryConfig;
use crate::fallback;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use opengpts::{
    EventStreamDecoder, JsonLinesDecoder, QueryUpdate, SseMessage, StreamRequest, Transport,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Streaming AI text. Each one replaces the text before it.
pub const AI_EVENT: &str = "ai";

/// A discrete result unit.
pub const RESULT_EVENT: &str = "result";

/// The canned payload delivered in place of live data.
pub const FALLBACK_EVENT: &str = "fallback";

const CROSS_ORIGIN_MESSAGE: &str =
    "CORS error: The API server doesn't allow requests from this origin.";

/// One decoded unit from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventRecord {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl StreamEventRecord {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// How a turn's stream failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection, status, or early-close failure.
    Transport,
    /// A transport failure whose text matches known cross-origin errors.
    /// Callers may offer a retry through an alternate route.
    CrossOrigin,
}

/// Terminal failure of one ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct IngestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl IngestFailure {
    /// Classify an error message by its text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if opengpts::is_cross_origin_message(&message) {
            Self {
                kind: FailureKind::CrossOrigin,
                message: format!("{CROSS_ORIGIN_MESSAGE} ({message})"),
            }
        } else {
            Self {
                kind: FailureKind::Transport,
                message,
            }
        }
    }

    pub fn is_cross_origin(&self) -> bool {
        self.kind == FailureKind::CrossOrigin
    }
}

impl From<&opengpts::Error> for IngestFailure {
    fn from(error: &opengpts::Error) -> Self {
        Self::classify(error.to_string())
    }
}

/// Summary of a successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestSummary {
    /// Records delivered to the callback.
    pub events: usize,
}

/// The terminal signal of an ingestion.
pub type IngestOutcome = Result<IngestSummary, IngestFailure>;

/// Which wire format the endpoint speaks. Fixed by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    JsonLines,
    EventStream,
}

enum RegimeDecoder {
    JsonLines(JsonLinesDecoder),
    EventStream(EventStreamDecoder),
}

type Decoded = Vec<Result<StreamEventRecord, opengpts::Error>>;

impl RegimeDecoder {
    fn new(regime: Regime) -> Self {
        match regime {
            Regime::JsonLines => RegimeDecoder::JsonLines(JsonLinesDecoder::new()),
            Regime::EventStream => RegimeDecoder::EventStream(EventStreamDecoder::new()),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Decoded {
        match self {
            RegimeDecoder::JsonLines(d) => from_updates(d.push(chunk)),
            RegimeDecoder::EventStream(d) => from_messages(d.push(chunk)),
        }
    }

    fn finish(&mut self) -> Decoded {
        match self {
            RegimeDecoder::JsonLines(d) => from_updates(d.finish()),
            RegimeDecoder::EventStream(d) => from_messages(d.finish()),
        }
    }
}

fn from_updates(updates: Vec<Result<QueryUpdate, opengpts::Error>>) -> Decoded {
    updates
        .into_iter()
        .map(|update| {
            update.map(|update| match update {
                QueryUpdate::Ai { item, .. } => StreamEventRecord::new(AI_EVENT, item),
                QueryUpdate::Result(item) => StreamEventRecord::new(RESULT_EVENT, item),
            })
        })
        .collect()
}

fn from_messages(messages: Vec<Result<SseMessage, opengpts::Error>>) -> Decoded {
    messages
        .into_iter()
        .map(|message| message.map(|m| StreamEventRecord::new(m.event, m.data)))
        .collect()
}

/// Consumes one streaming response per call.
pub struct Ingestor<T> {
    transport: T,
    config: StoryConfig,
}

impl<T: Transport> Ingestor<T> {
    pub fn new(transport: T, config: StoryConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn regime(&self) -> Regime {
        if self.config.use_event_stream_regime {
            Regime::EventStream
        } else {
            Regime::JsonLines
        }
    }

    /// The request this ingestor sends for a prompt.
    pub fn request_for(&self, prompt: &str) -> StreamRequest {
        match self.regime() {
            Regime::EventStream => {
                StreamRequest::message(self.config.endpoint.stream_url(), prompt)
            }
            Regime::JsonLines => StreamRequest::query(&self.config.endpoint.query_url, prompt),
        }
    }

    /// Stream one prompt, calling `on_event` once per decoded record.
    ///
    /// Malformed units are logged and skipped. A stream that ends without
    /// delivering anything is a failure. In the event-stream regime with
    /// fallback enabled, the canned payload is delivered before such a
    /// failure is returned.
    pub async fn ingest<F>(&self, prompt: &str, mut on_event: F) -> IngestOutcome
    where
        F: FnMut(StreamEventRecord),
    {
        let request = self.request_for(prompt);
        let regime = self.regime();
        info!(url = %request.url, ?regime, "opening story stream");

        let mut decoder = RegimeDecoder::new(regime);
        let mut delivered = 0usize;

        let error = match self.transport.open(&request).await {
            Err(e) => Some(e),
            Ok(mut stream) => {
                let mut error = None;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            deliver(decoder.push(&bytes), &mut on_event, &mut delivered)
                        }
                        Err(e) => {
                            error = Some(e);
                            break;
                        }
                    }
                }
                if error.is_none() {
                    deliver(decoder.finish(), &mut on_event, &mut delivered);
                }
                error
            }
        };

        let failure = match error {
            Some(e) => Some(IngestFailure::from(&e)),
            None if delivered == 0 => Some(IngestFailure::classify(
                "Stream closed without delivering any data",
            )),
            None => None,
        };

        let Some(failure) = failure else {
            info!(events = delivered, "story stream complete");
            return Ok(IngestSummary { events: delivered });
        };

        warn!(kind = ?failure.kind, error = %failure.message, events = delivered, "story stream failed");
        if delivered == 0 && self.config.use_fallback && regime == Regime::EventStream {
            warn!("delivering fallback story payload");
            on_event(StreamEventRecord::new(
                FALLBACK_EVENT,
                fallback::fallback_payload(),
            ));
        }
        Err(failure)
    }
}

fn deliver<F>(decoded: Decoded, on_event: &mut F, delivered: &mut usize)
where
    F: FnMut(StreamEventRecord),
{
    for record in decoded {
        match record {
            Ok(record) => {
                debug!(event_type = %record.event_type, "stream event");
                *delivered += 1;
                on_event(record);
            }
            Err(e) => warn!(error = %e, "skipping malformed stream chunk"),
        }
    }
}
