//! Conversation message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::search::SearchResult;

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user message
    User,
    /// Model reply
    Assistant,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a model conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling and length options for a chat call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f64>,
    /// Sampling seed for reproducible output
    pub seed: Option<u64>,
    /// Maximum prompt + completion tokens
    pub max_tokens: Option<u64>,
    /// Maximum completion tokens
    pub max_completion_tokens: Option<u64>,
    /// Frequency penalty
    pub frequency_penalty: Option<f64>,
    /// Presence penalty
    pub presence_penalty: Option<f64>,
    /// Whether the model may emit an explicit reasoning segment
    pub thinking: Option<bool>,
}

/// Token accounting for one completion
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: usize,
    /// Tokens produced in the completion
    pub completion_tokens: usize,
    /// Total tokens
    pub total_tokens: usize,
}

/// A non-streamed chat completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text
    pub content: String,
    /// Token accounting
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Build a response with content only
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// A persisted session message as returned by the history source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Request that produced this message; pairs user/assistant turns
    pub request_id: String,
    /// Author role
    pub role: Role,
    /// Text content
    pub content: String,
    /// References attached to assistant replies
    pub knowledge_references: Vec<SearchResult>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// One completed conversation turn reconstructed from stored messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// The user's question
    pub query: String,
    /// The assistant's answer, with any reasoning segment removed
    pub answer: String,
    /// Time of the user's question
    pub created_at: Option<DateTime<Utc>>,
    /// Knowledge references cited by the answer
    pub knowledge_references: Vec<SearchResult>,
}
