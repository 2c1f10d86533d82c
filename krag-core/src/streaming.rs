//! Streaming answer types
//!
//! A model's streamed completion flows through bounded channels: the
//! producer holds a [`StreamSender`], the consumer a [`AnswerStream`].
//! Downstream transforms (tracing, no-match filtering) each spawn exactly
//! one forwarding task that reads the inbound channel, transforms, and
//! writes to a fresh outbound channel, closing it when the inbound side is
//! exhausted. Dropping an [`AnswerStream`] makes the producer's `send`
//! fail, which is how cancellation propagates upstream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::search::SearchResult;

/// Capacity of the bounded channels carrying stream events
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// What a stream event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// A fragment of the generated answer
    Answer,
    /// The knowledge references backing the answer
    References,
}

/// One event on the outbound answer stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Request id the event belongs to
    pub id: String,
    /// Event payload kind
    pub response_type: ResponseType,
    /// Content fragment
    pub content: String,
    /// Whether this is the terminal event
    pub done: bool,
    /// Knowledge references, populated on reference events
    pub knowledge_references: Vec<SearchResult>,
}

impl StreamEvent {
    /// An answer fragment
    pub fn answer(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response_type: ResponseType::Answer,
            content: content.into(),
            done: false,
            knowledge_references: Vec::new(),
        }
    }

    /// The terminal answer event
    pub fn done(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response_type: ResponseType::Answer,
            content: String::new(),
            done: true,
            knowledge_references: Vec::new(),
        }
    }

    /// A references event
    pub fn references(id: impl Into<String>, references: Vec<SearchResult>) -> Self {
        Self {
            id: id.into(),
            response_type: ResponseType::References,
            content: String::new(),
            done: false,
            knowledge_references: references,
        }
    }

    /// The single terminal event used when retrieval found nothing
    pub fn fallback(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response_type: ResponseType::Answer,
            content: content.into(),
            done: true,
            knowledge_references: Vec::new(),
        }
    }
}

/// Sending half of an answer stream
pub type StreamSender = mpsc::Sender<StreamEvent>;

/// Receiving half of an answer stream, usable as a [`futures::Stream`]
#[derive(Debug)]
pub struct AnswerStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl AnswerStream {
    /// Create a bounded channel pair for a new stream segment
    pub fn channel() -> (StreamSender, AnswerStream) {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// Receive the next event, or `None` once the producer is done
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain the stream, concatenating answer content
    pub async fn collect_text(mut self) -> String {
        let mut out = String::new();
        while let Some(event) = self.rx.recv().await {
            if event.response_type == ResponseType::Answer {
                out.push_str(&event.content);
            }
            if event.done {
                break;
            }
        }
        out
    }

    /// Drain the stream into a vector of events
    pub async fn collect_events(mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.rx.recv().await {
            out.push(event);
        }
        out
    }
}

impl Stream for AnswerStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A stream carrying exactly one terminal fallback event.
///
/// Used by orchestrators when retrieval raised the "no results" signal.
pub fn fallback_stream(request_id: &str, fallback: &str) -> AnswerStream {
    let (tx, stream) = AnswerStream::channel();
    // Capacity is non-zero, so the single send cannot fail
    let _ = tx.try_send(StreamEvent::fallback(request_id, fallback));
    stream
}

/// Builder for scripted streams, useful in tests and mock providers
#[derive(Debug, Default)]
pub struct StreamBuilder {
    events: Vec<StreamEvent>,
}

impl StreamBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an answer fragment
    pub fn answer(mut self, id: impl Into<String>, content: impl Into<String>) -> Self {
        self.events.push(StreamEvent::answer(id, content));
        self
    }

    /// Append the terminal event
    pub fn done(mut self, id: impl Into<String>) -> Self {
        self.events.push(StreamEvent::done(id));
        self
    }

    /// Append an arbitrary event
    pub fn event(mut self, event: StreamEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Build the stream; all events are buffered up front
    pub fn build(self) -> AnswerStream {
        let capacity = self.events.len().max(1);
        let (tx, rx) = mpsc::channel(capacity);
        for event in self.events {
            // Capacity matches the event count, so sends cannot fail
            let _ = tx.try_send(event);
        }
        AnswerStream { rx }
    }
}
