//! External contracts consumed by the pipeline
//!
//! The pipeline never talks to a concrete model provider or storage
//! backend; it depends on these traits. Implementations live in the
//! application layer. [`mock`] provides in-memory implementations for
//! tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, Knowledge};
use crate::error::Result;
use crate::message::{ChatOptions, ChatResponse, Message, StoredMessage};
use crate::search::{SearchParams, SearchResult};
use crate::streaming::AnswerStream;

pub mod mock;

/// A node in the query-time entity graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphNode {
    /// Entity name
    pub name: String,
    /// Free-form attributes attached by extraction
    pub attributes: Vec<String>,
    /// Ids of chunks this entity appears in
    pub chunks: Vec<String>,
}

/// An edge in the query-time entity graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphRelation {
    /// Source entity name
    pub node1: String,
    /// Target entity name
    pub node2: String,
    /// Relation label
    pub relation: String,
}

/// Nodes and edges returned by a graph lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    /// Matched nodes
    pub nodes: Vec<GraphNode>,
    /// Edges between matched nodes
    pub relations: Vec<GraphRelation>,
}

/// Namespace scoping graph operations to one knowledge base
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Knowledge base id
    pub knowledge_base: String,
}

impl Namespace {
    /// Namespace for a knowledge base
    pub fn knowledge_base(id: impl Into<String>) -> Self {
        Self {
            knowledge_base: id.into(),
        }
    }
}

/// One reranked passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankResult {
    /// Index of the passage in the submitted list
    pub index: usize,
    /// Relevance score assigned by the rerank model
    pub score: f64,
    /// Echo of the scored passage text, when the model returns it
    pub document: Option<String>,
}

/// A chat-capable language model
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a completion for the conversation
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;

    /// Generate a streamed completion; events arrive on the returned stream
    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<AnswerStream>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// A second-pass relevance scoring model
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each passage against the query
    async fn rerank(&self, query: &str, passages: &[String]) -> Result<Vec<RankResult>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// The composite vector + keyword retrieval engine
#[async_trait]
pub trait RetrieveEngine: Send + Sync {
    /// Run a hybrid search against one knowledge base
    async fn hybrid_search(
        &self,
        knowledge_base_id: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>>;
}

/// Persisted entity/relationship graph lookup
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Find graph nodes by entity name within a namespace
    async fn search_node(
        &self,
        namespace: &Namespace,
        entity_names: &[String],
    ) -> Result<GraphData>;

    /// Persist graphs built during ingestion
    async fn add_graph(&self, namespace: &Namespace, graphs: &[GraphData]) -> Result<()>;

    /// Remove all graphs in the given namespaces
    async fn del_graph(&self, namespaces: &[Namespace]) -> Result<()>;
}

/// Batch chunk lookup
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetch chunk records by id; unknown ids are silently skipped
    async fn chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>>;
}

/// Batch knowledge lookup
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetch knowledge records by id; unknown ids are silently skipped
    async fn knowledge_batch(&self, ids: &[String]) -> Result<Vec<Knowledge>>;
}

/// Access to persisted session messages
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Most recent messages of a session, newest last
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;
}
