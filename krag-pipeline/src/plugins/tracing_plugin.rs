//! Cross-cutting span instrumentation
//!
//! A single plugin registered for every traced event type. It opens a
//! span, records stage inputs, hands control to the chain, and records
//! the stage outputs once the chain returns — business plugins stay free
//! of instrumentation. For streaming completion the span is closed by a
//! forwarding task once the stream is exhausted.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{field::Empty, info_span, Instrument};

use krag_core::error::Result;
use krag_core::streaming::{AnswerStream, ResponseType};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Records spans around pipeline stages
pub struct TracingPlugin;

impl TracingPlugin {
    /// Create the tracing plugin
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TracingPlugin {
    fn activation_events(&self) -> Vec<EventType> {
        vec![
            EventType::PreprocessQuery,
            EventType::RewriteQuery,
            EventType::ChunkSearch,
            EventType::ChunkRerank,
            EventType::ChunkMerge,
            EventType::FilterTopK,
            EventType::IntoChatMessage,
            EventType::ChatCompletion,
            EventType::ChatCompletionStream,
        ]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        match event {
            EventType::ChunkSearch => {
                let span = info_span!(
                    "pipeline.search",
                    query = %state.query,
                    vector_threshold = state.vector_threshold,
                    keyword_threshold = state.keyword_threshold,
                    top_k = state.embedding_top_k,
                    result_count = Empty,
                    processed_query = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("result_count", state.search_results.len());
                span.record("processed_query", state.processed_query.as_str());
                result
            }
            EventType::ChunkRerank => {
                let span = info_span!(
                    "pipeline.rerank",
                    query = %state.query,
                    passage_count = state.search_results.len(),
                    rerank_model_id = %state.rerank_model_id,
                    threshold = state.rerank_threshold,
                    result_count = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("result_count", state.rerank_results.len());
                result
            }
            EventType::ChunkMerge => {
                let span = info_span!(
                    "pipeline.merge",
                    search_count = state.search_results.len(),
                    rerank_count = state.rerank_results.len(),
                    merge_count = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("merge_count", state.merge_results.len());
                result
            }
            EventType::FilterTopK => {
                let span = info_span!(
                    "pipeline.filter_top_k",
                    top_k = state.rerank_top_k,
                    before = state.final_results().len(),
                    after = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("after", state.final_results().len());
                result
            }
            EventType::IntoChatMessage => {
                let span = info_span!(
                    "pipeline.into_chat_message",
                    merge_count = state.merge_results.len(),
                    content_len = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("content_len", state.user_content.len());
                result
            }
            EventType::ChatCompletion => {
                let span = info_span!(
                    "pipeline.chat_completion",
                    model_id = %state.chat_model_id,
                    reference_count = state.final_results().len(),
                    response_len = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record(
                    "response_len",
                    state.chat_response.as_ref().map_or(0, |r| r.content.len()),
                );
                result
            }
            EventType::ChatCompletionStream => {
                let span = info_span!(
                    "pipeline.chat_completion_stream",
                    model_id = %state.chat_model_id,
                    reference_count = state.final_results().len(),
                    response_len = Empty,
                    elapsed_ms = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;

                // Re-chain the stream so the span closes with the answer
                if let Some(mut inbound) = state.response_stream.take() {
                    let (tx, outbound) = AnswerStream::channel();
                    state.response_stream = Some(outbound);
                    let started = Instant::now();
                    tokio::spawn(async move {
                        let mut answer = String::new();
                        while let Some(event) = inbound.recv().await {
                            if event.response_type == ResponseType::Answer {
                                answer.push_str(&event.content);
                            }
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        span.record("response_len", answer.len());
                        span.record("elapsed_ms", started.elapsed().as_millis() as u64);
                    });
                }
                result
            }
            EventType::RewriteQuery => {
                let span = info_span!(
                    "pipeline.rewrite",
                    query = %state.query,
                    rewrite_query = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("rewrite_query", state.rewrite_query.as_str());
                result
            }
            EventType::PreprocessQuery => {
                let span = info_span!(
                    "pipeline.preprocess",
                    query = %state.query,
                    processed_query = Empty,
                );
                let result = next.run(event, state).instrument(span.clone()).await;
                span.record("processed_query", state.processed_query.as_str());
                result
            }
            _ => next.run(event, state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::streaming::StreamBuilder;

    #[tokio::test]
    async fn tracing_is_transparent_to_the_chain() {
        let plugin = TracingPlugin::new();
        let mut state = ChatState::default();
        state.query = "q".into();

        plugin
            .on_event(EventType::ChunkSearch, &mut state, Next::noop())
            .await
            .unwrap();

        assert!(state.search_results.is_empty());
    }

    #[tokio::test]
    async fn stream_events_survive_the_tracing_rechain() {
        let plugin = TracingPlugin::new();
        let mut state = ChatState::default();
        state.response_stream = Some(
            StreamBuilder::new()
                .answer("r1", "streamed ")
                .answer("r1", "answer")
                .done("r1")
                .build(),
        );

        plugin
            .on_event(EventType::ChatCompletionStream, &mut state, Next::noop())
            .await
            .unwrap();

        let text = state.response_stream.take().unwrap().collect_text().await;
        assert_eq!(text, "streamed answer");
    }
}
