//! Pipeline plugins
//!
//! One module per stage. Every plugin is independent: it reads and writes
//! only the request's [`crate::state::ChatState`] and the contracts it was
//! constructed with.

mod completion;
mod extract_entity;
mod filter_top_k;
mod into_prompt;
mod merge;
mod preprocess;
mod rerank;
mod rewrite;
mod search;
mod search_entity;
mod stream_filter;
mod tracing_plugin;

pub use completion::{ChatCompleter, StreamChatCompleter};
pub use extract_entity::{EntityExtractor, ExtractionExample, ExtractionTemplate};
pub use filter_top_k::TopKFilter;
pub use into_prompt::PromptAssembler;
pub use merge::ChunkMerger;
pub use preprocess::QueryPreprocessor;
pub use rerank::{ResultReranker, HISTORY_THRESHOLD_FLOOR, HISTORY_THRESHOLD_RELAXATION};
pub use rewrite::QueryRewriter;
pub use search::ChunkSearcher;
pub use search_entity::EntitySearcher;
pub use stream_filter::StreamFilter;
pub use tracing_plugin::TracingPlugin;
