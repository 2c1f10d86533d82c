//! Per-request pipeline state
//!
//! One [`ChatState`] is created per request, threaded mutably through the
//! plugin chain, and discarded when the request ends. It is never shared
//! across requests; the only piece that outlives the pipeline run is the
//! outbound answer stream handed to the transport layer.

use krag_core::config::{ConversationConfig, SummaryConfig};
use krag_core::message::{ChatResponse, HistoryTurn};
use krag_core::provider::GraphData;
use krag_core::search::SearchResult;
use krag_core::streaming::AnswerStream;

/// Mutable request-scoped state threaded through every pipeline stage
#[derive(Default)]
pub struct ChatState {
    /// Session the request belongs to
    pub session_id: String,
    /// Unique request id, also stamped onto stream events
    pub request_id: String,
    /// Original user query
    pub query: String,
    /// Query after cleaning, tokenization and stopword filtering
    pub processed_query: String,
    /// Query after LLM rewriting; initialized to the original query
    pub rewrite_query: String,
    /// Conversation history, oldest first
    pub history: Vec<HistoryTurn>,

    /// Knowledge base searched by this request
    pub knowledge_base_id: String,
    /// Minimum score for vector matches
    pub vector_threshold: f64,
    /// Minimum score for keyword matches
    pub keyword_threshold: f64,
    /// Candidates requested per retriever
    pub embedding_top_k: usize,

    /// Rerank model id; empty disables reranking
    pub rerank_model_id: String,
    /// Final result count after merging
    pub rerank_top_k: usize,
    /// Minimum rerank relevance score
    pub rerank_threshold: f64,

    /// Chat model id, recorded on spans
    pub chat_model_id: String,
    /// Generation settings for the final answer
    pub summary_config: SummaryConfig,
    /// Answer used when retrieval finds nothing
    pub fallback_response: String,

    /// Entity names extracted from the query
    pub entities: Vec<String>,
    /// Graph lookup result for the extracted entities
    pub graph_result: Option<GraphData>,
    /// Candidates accumulated by the search stages
    pub search_results: Vec<SearchResult>,
    /// Candidates that passed reranking
    pub rerank_results: Vec<SearchResult>,
    /// Final merged candidates
    pub merge_results: Vec<SearchResult>,
    /// Rendered user message for the chat model
    pub user_content: String,
    /// Final non-streamed answer
    pub chat_response: Option<ChatResponse>,
    /// Outbound answer stream
    pub response_stream: Option<AnswerStream>,
}

impl ChatState {
    /// Create state for a new request from conversation defaults
    pub fn new(
        session_id: impl Into<String>,
        request_id: impl Into<String>,
        query: impl Into<String>,
        knowledge_base_id: impl Into<String>,
        config: &ConversationConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request_id: request_id.into(),
            query: query.into(),
            knowledge_base_id: knowledge_base_id.into(),
            vector_threshold: config.vector_threshold,
            keyword_threshold: config.keyword_threshold,
            embedding_top_k: config.embedding_top_k,
            rerank_top_k: config.rerank_top_k,
            rerank_threshold: config.rerank_threshold,
            fallback_response: config.fallback_response.clone(),
            ..Self::default()
        }
    }

    /// Copy the configuration of this state for a fresh request,
    /// leaving every accumulated result behind
    pub fn fork_for_request(
        &self,
        request_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            session_id: self.session_id.clone(),
            request_id: request_id.into(),
            query: query.into(),
            knowledge_base_id: self.knowledge_base_id.clone(),
            vector_threshold: self.vector_threshold,
            keyword_threshold: self.keyword_threshold,
            embedding_top_k: self.embedding_top_k,
            rerank_model_id: self.rerank_model_id.clone(),
            rerank_top_k: self.rerank_top_k,
            rerank_threshold: self.rerank_threshold,
            chat_model_id: self.chat_model_id.clone(),
            summary_config: self.summary_config.clone(),
            fallback_response: self.fallback_response.clone(),
            ..Self::default()
        }
    }

    /// The result list later stages should read:
    /// merge output, else rerank output, else raw search output
    pub fn final_results(&self) -> &[SearchResult] {
        if !self.merge_results.is_empty() {
            &self.merge_results
        } else if !self.rerank_results.is_empty() {
            &self.rerank_results
        } else {
            &self.search_results
        }
    }
}
