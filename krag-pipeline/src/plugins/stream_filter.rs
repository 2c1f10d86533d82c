//! Answer stream post-filtering
//!
//! Re-chains the outbound stream through one forwarding task. When a
//! no-match prefix is configured, tokens are held back while the
//! accumulated answer is still a prefix of it; if the stream ends still
//! matching, the single fallback event is emitted instead. The forwarder
//! exits when the inbound channel closes or the outbound receiver is
//! dropped, closing its channel either way.

use async_trait::async_trait;
use tracing::debug;

use krag_core::error::Result;
use krag_core::streaming::{AnswerStream, ResponseType, StreamEvent, StreamSender};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Applies no-match filtering to the answer stream
pub struct StreamFilter;

impl StreamFilter {
    /// Create the filter
    pub fn new() -> Self {
        Self
    }
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_filtered(
    mut inbound: AnswerStream,
    tx: StreamSender,
    no_match_prefix: String,
    fallback_response: String,
    request_id: String,
) {
    let mut answer = String::new();
    let mut holding = !no_match_prefix.is_empty();

    while let Some(mut event) = inbound.recv().await {
        if event.response_type == ResponseType::Answer {
            answer.push_str(&event.content);
        }

        if !holding {
            if tx.send(event).await.is_err() {
                // Receiver dropped; dropping inbound cancels upstream
                return;
            }
            continue;
        }

        // Hold tokens while the answer could still be the no-match marker;
        // once it diverges, release everything accumulated so far
        if !no_match_prefix.starts_with(&answer) {
            event.content = answer.clone();
            holding = false;
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }

    if holding {
        debug!("answer matched the no-match prefix, emitting fallback");
        let _ = tx
            .send(StreamEvent::fallback(&request_id, &fallback_response))
            .await;
    }
}

#[async_trait]
impl Plugin for StreamFilter {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::StreamFilter]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let Some(inbound) = state.response_stream.take() else {
            debug!("no response stream to filter");
            return next.run(event, state).await;
        };

        let (tx, outbound) = AnswerStream::channel();
        tokio::spawn(forward_filtered(
            inbound,
            tx,
            state.summary_config.no_match_prefix.clone(),
            state.fallback_response.clone(),
            state.request_id.clone(),
        ));
        state.response_stream = Some(outbound);

        next.run(event, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::streaming::StreamBuilder;

    async fn run_filter(state: &mut ChatState) {
        StreamFilter::new()
            .on_event(EventType::StreamFilter, state, Next::noop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn without_prefix_events_pass_through() {
        let mut state = ChatState::default();
        state.response_stream = Some(
            StreamBuilder::new()
                .answer("r1", "hello ")
                .answer("r1", "world")
                .done("r1")
                .build(),
        );

        run_filter(&mut state).await;

        let text = state.response_stream.take().unwrap().collect_text().await;
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn matching_answer_is_replaced_by_fallback() {
        let mut state = ChatState::default();
        state.request_id = "r1".into();
        state.summary_config.no_match_prefix = "NO_MATCH".into();
        state.fallback_response = "sorry, nothing found".into();
        state.response_stream = Some(
            StreamBuilder::new()
                .answer("r1", "NO_")
                .answer("r1", "MATCH")
                .done("r1")
                .build(),
        );

        run_filter(&mut state).await;

        let events = state.response_stream.take().unwrap().collect_events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].done);
        assert_eq!(events[0].content, "sorry, nothing found");
    }

    #[tokio::test]
    async fn diverging_answer_is_released_with_accumulated_content() {
        let mut state = ChatState::default();
        state.summary_config.no_match_prefix = "NO_MATCH".into();
        state.fallback_response = "unused".into();
        state.response_stream = Some(
            StreamBuilder::new()
                .answer("r1", "NO_")
                .answer("r1", "actually here is the answer")
                .answer("r1", " and more")
                .done("r1")
                .build(),
        );

        run_filter(&mut state).await;

        let events = state.response_stream.take().unwrap().collect_events().await;
        // First event carries everything accumulated before divergence
        assert_eq!(events[0].content, "NO_actually here is the answer");
        // Later events flow through unchanged
        assert_eq!(events[1].content, " and more");
        assert!(events.last().unwrap().done);
    }

    #[tokio::test]
    async fn missing_stream_is_tolerated() {
        let mut state = ChatState::default();
        run_filter(&mut state).await;
        assert!(state.response_stream.is_none());
    }
}
