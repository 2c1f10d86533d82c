//! # KRAG Pipeline
//!
//! The event-driven retrieval and generation pipeline: an event manager
//! composing independent plugins over a per-request mutable state, with
//! uniform error and fallback semantics.
//!
//! A query-answering request runs a named event sequence (see
//! [`event::sequences`]); each event triggers the plugins registered for
//! it as a middleware chain. The "no results" signal short-circuits the
//! sequence into the configured fallback answer; hard errors abort it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use krag_core::config::ConversationConfig;
//! use krag_core::provider::mock::{
//!     InMemoryChunkStore, InMemoryKnowledgeStore, MockChatModel, MockRetrieveEngine,
//! };
//! use krag_pipeline::event::{sequences, EventManager};
//! use krag_pipeline::expansion::ContextExpander;
//! use krag_pipeline::plugins::*;
//! use krag_pipeline::state::ChatState;
//!
//! # async fn run() -> krag_core::error::Result<()> {
//! let chat_model = Arc::new(MockChatModel::new("an answer"));
//! let engine = Arc::new(MockRetrieveEngine::default());
//! let chunks = Arc::new(InMemoryChunkStore::new());
//! let knowledge = Arc::new(InMemoryKnowledgeStore::new());
//!
//! let mut manager = EventManager::new();
//! manager.register(Arc::new(QueryPreprocessor::new()));
//! manager.register(Arc::new(ChunkSearcher::new(
//!     engine,
//!     ContextExpander::new(chunks, knowledge),
//! )));
//! manager.register(Arc::new(ChunkMerger::new()));
//! manager.register(Arc::new(TopKFilter::new()));
//! manager.register(Arc::new(PromptAssembler::new()));
//! manager.register(Arc::new(StreamChatCompleter::new(chat_model)));
//! manager.register(Arc::new(StreamFilter::new()));
//!
//! let mut state = ChatState::new(
//!     "session-1",
//!     "request-1",
//!     "what is hybrid retrieval?",
//!     "kb-1",
//!     &ConversationConfig::default(),
//! );
//! manager.run_sequence(sequences::RAG_STREAM, &mut state).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod event;
pub mod expansion;
pub mod plugins;
pub mod state;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::event::{sequences, EventManager, EventType, Next, Plugin};
    pub use crate::expansion::ContextExpander;
    pub use crate::plugins::{
        ChatCompleter, ChunkMerger, ChunkSearcher, EntityExtractor, EntitySearcher,
        PromptAssembler, QueryPreprocessor, QueryRewriter, ResultReranker, StreamChatCompleter,
        StreamFilter, TopKFilter, TracingPlugin,
    };
    pub use crate::state::ChatState;
}
