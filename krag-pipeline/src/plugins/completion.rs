//! Chat completion plugins, synchronous and streaming

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use krag_core::config::SummaryConfig;
use krag_core::error::{Error, Result};
use krag_core::message::{ChatOptions, Message};
use krag_core::provider::ChatModel;

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// How many trailing history turns are replayed to the model
const COMPLETION_HISTORY_TURNS: usize = 2;

fn chat_options(config: &SummaryConfig) -> ChatOptions {
    ChatOptions {
        temperature: config.temperature,
        top_p: config.top_p,
        seed: config.seed,
        max_tokens: config.max_tokens,
        max_completion_tokens: config.max_completion_tokens,
        frequency_penalty: config.frequency_penalty,
        presence_penalty: config.presence_penalty,
        thinking: None,
    }
}

/// System prompt, the last history turns, then the assembled user content
fn messages_with_history(state: &ChatState) -> Vec<Message> {
    let mut messages = vec![Message::system(&state.summary_config.prompt)];

    let history = if state.history.len() > COMPLETION_HISTORY_TURNS {
        &state.history[state.history.len() - COMPLETION_HISTORY_TURNS..]
    } else {
        &state.history[..]
    };
    for turn in history {
        messages.push(Message::user(&turn.query));
        messages.push(Message::assistant(&turn.answer));
    }

    messages.push(Message::user(&state.user_content));
    messages
}

/// Generates the final answer in one call
pub struct ChatCompleter {
    chat_model: Arc<dyn ChatModel>,
}

impl ChatCompleter {
    /// Create the completion plugin
    pub fn new(chat_model: Arc<dyn ChatModel>) -> Self {
        Self { chat_model }
    }
}

#[async_trait]
impl Plugin for ChatCompleter {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::ChatCompletion]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let messages = messages_with_history(state);
        let options = chat_options(&state.summary_config);
        debug!(message_count = messages.len(), "calling chat model");

        let response = self
            .chat_model
            .chat(&messages, &options)
            .await
            .map_err(|e| Error::model_call(e.to_string()))?;

        info!(content_len = response.content.len(), "chat completion finished");
        state.chat_response = Some(response);
        next.run(event, state).await
    }
}

/// Generates the final answer as a stream
pub struct StreamChatCompleter {
    chat_model: Arc<dyn ChatModel>,
}

impl StreamChatCompleter {
    /// Create the streaming completion plugin
    pub fn new(chat_model: Arc<dyn ChatModel>) -> Self {
        Self { chat_model }
    }
}

#[async_trait]
impl Plugin for StreamChatCompleter {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::ChatCompletionStream]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let messages = messages_with_history(state);
        let options = chat_options(&state.summary_config);
        debug!(message_count = messages.len(), "calling chat model (stream)");

        let stream = self
            .chat_model
            .chat_stream(&messages, &options)
            .await
            .map_err(|e| Error::model_call(e.to_string()))?;

        info!("chat stream initiated");
        state.response_stream = Some(stream);
        next.run(event, state).await
    }
}
