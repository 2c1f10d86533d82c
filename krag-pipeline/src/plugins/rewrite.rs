//! Query rewriting against conversation history
//!
//! Rewrites follow-up questions into self-contained search queries using
//! the model and the session's recent turns. Every failure here is soft:
//! the pipeline continues with the original query.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex::Regex;
use tracing::{info, warn};

use krag_core::config::{render_template, ConversationConfig};
use krag_core::error::Result;
use krag_core::message::{ChatOptions, HistoryTurn, Message, Role, StoredMessage};
use krag_core::provider::{ChatModel, HistorySource};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// How many stored messages to load before grouping into turns
const RECENT_MESSAGE_LIMIT: usize = 20;
/// Rewrite sampling temperature
const REWRITE_TEMPERATURE: f64 = 0.3;
/// Rewritten queries are short; cap the completion accordingly
const REWRITE_MAX_COMPLETION_TOKENS: u64 = 50;

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex is valid"));

/// Rewrites the user query using the last conversation turns
pub struct QueryRewriter {
    chat_model: Arc<dyn ChatModel>,
    history_source: Arc<dyn HistorySource>,
    config: ConversationConfig,
}

impl QueryRewriter {
    /// Create the rewriter over a chat model and history source
    pub fn new(
        chat_model: Arc<dyn ChatModel>,
        history_source: Arc<dyn HistorySource>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            chat_model,
            history_source,
            config,
        }
    }

    async fn load_history(&self, session_id: &str) -> Vec<HistoryTurn> {
        match self
            .history_source
            .recent_messages(session_id, RECENT_MESSAGE_LIMIT)
            .await
        {
            Ok(messages) => build_history(messages, self.config.max_rounds),
            Err(err) => {
                warn!(error = %err, session_id, "failed to load conversation history");
                Vec::new()
            }
        }
    }
}

/// Group stored messages into completed turns, newest `max_rounds` kept,
/// returned in chronological order. Reasoning segments are stripped from
/// answers; turns missing either side are dropped.
fn build_history(messages: Vec<StoredMessage>, max_rounds: usize) -> Vec<HistoryTurn> {
    let mut by_request: HashMap<String, HistoryTurn> = HashMap::new();

    for message in messages {
        let turn = by_request.entry(message.request_id.clone()).or_default();
        match message.role {
            Role::User => {
                turn.query = message.content;
                turn.created_at = Some(message.created_at);
            }
            Role::Assistant => {
                turn.answer = THINK_RE.replace_all(&message.content, "").to_string();
                turn.knowledge_references = message.knowledge_references;
            }
            Role::System => {}
        }
    }

    let mut turns: Vec<HistoryTurn> = by_request
        .into_values()
        .filter(|t| !t.query.is_empty() && !t.answer.is_empty())
        .collect();

    // Newest first, cap, then back to chronological order
    turns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    turns.truncate(max_rounds);
    turns.reverse();
    turns
}

#[async_trait]
impl Plugin for QueryRewriter {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::RewriteQuery]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        state.rewrite_query = state.query.clone();
        state.history = self.load_history(&state.session_id).await;

        let now = Utc::now();
        let current_time = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let yesterday = (now - Duration::days(1)).format("%Y-%m-%d").to_string();
        let conversation = state
            .history
            .iter()
            .map(|t| format!("user: {}\nassistant: {}", t.query, t.answer))
            .collect::<Vec<_>>()
            .join("\n");

        let vars: [(&str, &str); 4] = [
            ("query", &state.query),
            ("current_time", &current_time),
            ("yesterday", &yesterday),
            ("conversation", &conversation),
        ];
        let system = render_template(&self.config.rewrite_prompt_system, &vars);
        let user = render_template(&self.config.rewrite_prompt_user, &vars);

        let options = ChatOptions {
            temperature: Some(REWRITE_TEMPERATURE),
            max_completion_tokens: Some(REWRITE_MAX_COMPLETION_TOKENS),
            thinking: Some(false),
            ..ChatOptions::default()
        };

        match self
            .chat_model
            .chat(&[Message::system(system), Message::user(user)], &options)
            .await
        {
            Ok(response) => {
                let rewritten = response.content.trim();
                if !rewritten.is_empty() {
                    state.rewrite_query = rewritten.to_string();
                }
            }
            Err(err) => {
                warn!(error = %err, session_id = %state.session_id, "query rewrite failed");
            }
        }

        info!(
            session_id = %state.session_id,
            rewrite_query = %state.rewrite_query,
            "query rewritten"
        );
        next.run(event, state).await
    }
}
