//! # KRAG Core
//!
//! Core types, contracts, and error taxonomy for the KRAG knowledge-base
//! question-answering pipeline.
//!
//! This crate provides:
//! - Chunk and knowledge types (`chunk`) - the retrieval unit
//! - Search results (`search`) - scored, typed retrieval candidates
//! - Messages (`message`) - conversation and history types
//! - Streaming (`streaming`) - bounded-channel answer streams
//! - Contracts (`provider`) - the external services the pipeline consumes
//! - Extraction helpers (`extract`) - fenced-JSON model output parsing
//! - Configuration (`config`) - conversation and summary defaults

#![warn(missing_docs)]

pub mod chunk;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod message;
pub mod provider;
pub mod search;
pub mod streaming;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::chunk::{Chunk, ChunkType, ImageInfo, Knowledge};
    pub use crate::config::{ConversationConfig, SummaryConfig};
    pub use crate::error::{Error, Result};
    pub use crate::message::{ChatOptions, ChatResponse, HistoryTurn, Message, Role};
    pub use crate::provider::{
        ChatModel, ChunkStore, GraphData, GraphNode, GraphStore, HistorySource, KnowledgeStore,
        Namespace, RankResult, Reranker, RetrieveEngine,
    };
    pub use crate::search::{dedupe_by_chunk_id, MatchType, SearchParams, SearchResult};
    pub use crate::streaming::{AnswerStream, ResponseType, StreamEvent, StreamSender};
}
