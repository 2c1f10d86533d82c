//! Event manager and plugin contract
//!
//! The pipeline is composed of independent plugins, each declaring the
//! event types it handles. Triggering an event runs the registered
//! plugins for it as a middleware chain: each plugin may run code before
//! and after handing control to the rest of the chain through [`Next`],
//! which makes cross-cutting concerns (timing, span attributes) possible
//! without touching business plugins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use krag_core::error::{Error, Result};
use krag_core::message::ChatResponse;
use krag_core::streaming::fallback_stream;

use crate::state::ChatState;

/// Stages of the question-answering pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Clean, tokenize and stopword-filter the query
    PreprocessQuery,
    /// Rewrite the query using conversation history
    RewriteQuery,
    /// Hybrid vector + keyword search
    ChunkSearch,
    /// Graph-based entity search
    EntitySearch,
    /// Second-pass relevance scoring
    ChunkRerank,
    /// Overlap-aware chunk merging
    ChunkMerge,
    /// Keep only the top K results
    FilterTopK,
    /// Render retrieved passages into the user message
    IntoChatMessage,
    /// Generate the answer
    ChatCompletion,
    /// Generate the answer as a stream
    ChatCompletionStream,
    /// Post-process the answer stream
    StreamFilter,
}

impl EventType {
    /// Stable identifier used in logs and spans
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreprocessQuery => "preprocess_query",
            Self::RewriteQuery => "rewrite_query",
            Self::ChunkSearch => "chunk_search",
            Self::EntitySearch => "entity_search",
            Self::ChunkRerank => "chunk_rerank",
            Self::ChunkMerge => "chunk_merge",
            Self::FilterTopK => "filter_top_k",
            Self::IntoChatMessage => "into_chat_message",
            Self::ChatCompletion => "chat_completion",
            Self::ChatCompletionStream => "chat_completion_stream",
            Self::StreamFilter => "stream_filter",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predefined event sequences for the supported chat modes
pub mod sequences {
    use super::EventType::{self, *};

    /// Plain chat without retrieval
    pub const CHAT: &[EventType] = &[ChatCompletion];

    /// Streamed chat without retrieval
    pub const CHAT_STREAM: &[EventType] = &[ChatCompletionStream, StreamFilter];

    /// Retrieval-augmented generation
    pub const RAG: &[EventType] = &[
        ChunkSearch,
        ChunkRerank,
        ChunkMerge,
        IntoChatMessage,
        ChatCompletion,
    ];

    /// Streamed retrieval-augmented generation
    pub const RAG_STREAM: &[EventType] = &[
        RewriteQuery,
        PreprocessQuery,
        ChunkSearch,
        EntitySearch,
        ChunkRerank,
        ChunkMerge,
        FilterTopK,
        IntoChatMessage,
        ChatCompletionStream,
        StreamFilter,
    ];

    /// Retrieval only, no generation
    pub const KNOWLEDGE_SEARCH: &[EventType] = &[
        PreprocessQuery,
        ChunkSearch,
        ChunkRerank,
        ChunkMerge,
        FilterTopK,
    ];
}

/// A pipeline stage
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The event types this plugin handles
    fn activation_events(&self) -> Vec<EventType>;

    /// Handle an event. Call `next.run(event, state)` to hand control to
    /// the rest of the chain; skipping the call short-circuits it.
    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()>;
}

/// Continuation over the remaining plugins of a chain.
///
/// An explicit index-free cursor: `run` pops the head plugin and passes a
/// cursor over the tail, so the last-registered plugin ends up innermost.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Plugin>],
}

impl Next<'_> {
    /// Invoke the remainder of the chain; a no-op at the end of the chain
    pub async fn run(self, event: EventType, state: &mut ChatState) -> Result<()> {
        match self.chain.split_first() {
            Some((plugin, rest)) => plugin.on_event(event, state, Next { chain: rest }).await,
            None => Ok(()),
        }
    }

    /// An empty continuation, for driving a single plugin in tests
    #[cfg(test)]
    pub(crate) fn noop() -> Next<'static> {
        Next { chain: &[] }
    }
}

/// Registers plugins and dispatches events to them
#[derive(Default)]
pub struct EventManager {
    listeners: HashMap<EventType, Vec<Arc<dyn Plugin>>>,
}

impl EventManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin for every event type it declares.
    /// Chains run in registration order.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        for event in plugin.activation_events() {
            self.listeners.entry(event).or_default().push(plugin.clone());
        }
    }

    /// Run the plugin chain for an event.
    /// Triggering an event with no registered plugins succeeds as a no-op.
    pub async fn trigger(&self, event: EventType, state: &mut ChatState) -> Result<()> {
        match self.listeners.get(&event) {
            Some(chain) => Next { chain }.run(event, state).await,
            None => Ok(()),
        }
    }

    /// Run a sequence of events, applying the shared fallback semantics:
    /// the "no results" signal substitutes the configured fallback answer
    /// (and a single terminal stream event) and reports success; any other
    /// error aborts the remaining events and is returned.
    pub async fn run_sequence(
        &self,
        events: &[EventType],
        state: &mut ChatState,
    ) -> Result<()> {
        for &event in events {
            debug!(event = %event, "triggering event");
            match self.trigger(event, state).await {
                Ok(()) => {}
                Err(err) if err.is_no_results() => {
                    warn!(event = %event, "no relevant content, using fallback response");
                    state.response_stream = Some(fallback_stream(
                        &state.request_id,
                        &state.fallback_response,
                    ));
                    state.chat_response =
                        Some(ChatResponse::new(state.fallback_response.clone()));
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        event = %event,
                        error_type = err.kind(),
                        error = %err,
                        "event failed"
                    );
                    return Err(err);
                }
            }
        }
        info!("all events completed");
        Ok(())
    }
}
