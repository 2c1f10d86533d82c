//! Mock implementations of the external contracts, for tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chunk::{Chunk, Knowledge};
use crate::error::{Error, Result};
use crate::message::{ChatOptions, ChatResponse, Message, StoredMessage};
use crate::provider::{
    ChatModel, ChunkStore, GraphData, GraphStore, HistorySource, KnowledgeStore, Namespace,
    RankResult, Reranker, RetrieveEngine,
};
use crate::search::{SearchParams, SearchResult};
use crate::streaming::{AnswerStream, StreamBuilder};

/// A chat model returning scripted responses
pub struct MockChatModel {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    fail: bool,
}

impl MockChatModel {
    /// Always answer with the given response
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: response.into(),
            fail: false,
        }
    }

    /// Answer with the given responses in order, then fall back to the last
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: VecDeque<String> = responses.into_iter().map(Into::into).collect();
        let default_response = queue.back().cloned().unwrap_or_default();
        Self {
            responses: Mutex::new(queue),
            default_response,
            fail: false,
        }
    }

    /// Fail every call
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: String::new(),
            fail: true,
        }
    }

    fn next_response(&self) -> String {
        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        queue
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, _messages: &[Message], _options: &ChatOptions) -> Result<ChatResponse> {
        if self.fail {
            return Err(Error::model_call("mock chat failure"));
        }
        Ok(ChatResponse::new(self.next_response()))
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<AnswerStream> {
        if self.fail {
            return Err(Error::model_call("mock chat failure"));
        }

        // Split the response into small fragments to simulate streaming
        let response = self.next_response();
        let fragments: Vec<String> = response
            .chars()
            .collect::<Vec<_>>()
            .chunks(10)
            .map(|c| c.iter().collect())
            .collect();

        let mut builder = StreamBuilder::new();
        for fragment in fragments {
            builder = builder.answer("", fragment);
        }
        Ok(builder.done("").build())
    }

    fn name(&self) -> &str {
        "mock-chat"
    }
}

/// A reranker replaying scripted results per call
pub struct MockReranker {
    scripts: Mutex<VecDeque<Vec<RankResult>>>,
    default_score: Option<f64>,
}

impl MockReranker {
    /// Return the scripted result lists in order, then empty lists
    pub fn with_scripts(scripts: Vec<Vec<RankResult>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            default_score: None,
        }
    }

    /// Score every submitted passage with the same score
    pub fn uniform(score: f64) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            default_score: Some(score),
        }
    }
}

#[async_trait]
impl Reranker for MockReranker {
    async fn rerank(&self, _query: &str, passages: &[String]) -> Result<Vec<RankResult>> {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(script) = scripts.pop_front() {
            return Ok(script);
        }
        if let Some(score) = self.default_score {
            return Ok(passages
                .iter()
                .enumerate()
                .map(|(index, passage)| RankResult {
                    index,
                    score,
                    document: Some(passage.clone()),
                })
                .collect());
        }
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "mock-rerank"
    }
}

/// A retrieval engine answering from preset result lists
#[derive(Default)]
pub struct MockRetrieveEngine {
    by_query: Mutex<HashMap<String, Vec<SearchResult>>>,
    default: Vec<SearchResult>,
    queries: Mutex<Vec<String>>,
}

impl MockRetrieveEngine {
    /// Answer every query with the given results
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            default: results,
            ..Self::default()
        }
    }

    /// Answer a specific query text with the given results
    pub fn insert(&self, query: impl Into<String>, results: Vec<SearchResult>) {
        self.by_query
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(query.into(), results);
    }

    /// Query texts received so far
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl RetrieveEngine for MockRetrieveEngine {
    async fn hybrid_search(
        &self,
        _knowledge_base_id: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchResult>> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(params.query_text.clone());

        let by_query = self.by_query.lock().unwrap_or_else(|e| e.into_inner());
        Ok(by_query
            .get(&params.query_text)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// A graph store answering node lookups from a preset graph
#[derive(Default)]
pub struct MockGraphStore {
    graph: GraphData,
}

impl MockGraphStore {
    /// Answer every lookup with the given graph
    pub fn with_graph(graph: GraphData) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn search_node(
        &self,
        _namespace: &Namespace,
        entity_names: &[String],
    ) -> Result<GraphData> {
        // Return only the nodes whose names were asked for
        let nodes = self
            .graph
            .nodes
            .iter()
            .filter(|n| entity_names.contains(&n.name))
            .cloned()
            .collect();
        Ok(GraphData {
            nodes,
            relations: self.graph.relations.clone(),
        })
    }

    async fn add_graph(&self, _namespace: &Namespace, _graphs: &[GraphData]) -> Result<()> {
        Ok(())
    }

    async fn del_graph(&self, _namespaces: &[Namespace]) -> Result<()> {
        Ok(())
    }
}

/// An in-memory chunk store
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: Mutex<HashMap<String, Chunk>>,
}

impl InMemoryChunkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk
    pub fn insert(&self, chunk: Chunk) {
        self.chunks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chunk.id.clone(), chunk);
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn chunks_by_id(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let chunks = self.chunks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ids.iter().filter_map(|id| chunks.get(id).cloned()).collect())
    }
}

/// An in-memory knowledge store
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    records: Mutex<HashMap<String, Knowledge>>,
}

impl InMemoryKnowledgeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a knowledge record
    pub fn insert(&self, knowledge: Knowledge) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(knowledge.id.clone(), knowledge);
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn knowledge_batch(&self, ids: &[String]) -> Result<Vec<Knowledge>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}

/// A history source returning preset stored messages
#[derive(Default)]
pub struct MockHistorySource {
    messages: Vec<StoredMessage>,
}

impl MockHistorySource {
    /// Answer with the given messages, newest last
    pub fn with_messages(messages: Vec<StoredMessage>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl HistorySource for MockHistorySource {
    async fn recent_messages(&self, _session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let start = self.messages.len().saturating_sub(limit);
        Ok(self.messages[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_chat_model_streams_response() {
        let model = MockChatModel::new("Hello, world!");
        let stream = model
            .chat_stream(&[Message::user("Hi")], &ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(stream.collect_text().await, "Hello, world!");
    }

    #[tokio::test]
    async fn mock_chat_model_replays_scripted_responses() {
        let model = MockChatModel::with_responses(["first", "second"]);
        let opts = ChatOptions::default();

        assert_eq!(model.chat(&[], &opts).await.unwrap().content, "first");
        assert_eq!(model.chat(&[], &opts).await.unwrap().content, "second");
        // Exhausted queue falls back to the last response
        assert_eq!(model.chat(&[], &opts).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn mock_engine_answers_by_query() {
        let engine = MockRetrieveEngine::with_results(vec![SearchResult {
            id: "default".into(),
            ..SearchResult::default()
        }]);
        engine.insert(
            "specific",
            vec![SearchResult {
                id: "special".into(),
                ..SearchResult::default()
            }],
        );

        let params = SearchParams {
            query_text: "specific".into(),
            vector_threshold: 0.0,
            keyword_threshold: 0.0,
            match_count: 10,
        };
        let results = engine.hybrid_search("kb", &params).await.unwrap();
        assert_eq!(results[0].id, "special");
        assert_eq!(engine.queries(), vec!["specific".to_string()]);
    }
}
