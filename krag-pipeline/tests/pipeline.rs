//! End-to-end pipeline tests over mock providers

use std::sync::Arc;

use krag_core::config::ConversationConfig;
use krag_core::provider::mock::{
    InMemoryChunkStore, InMemoryKnowledgeStore, MockChatModel, MockHistorySource,
    MockRetrieveEngine,
};
use krag_core::search::{MatchType, SearchResult};
use krag_core::streaming::ResponseType;
use krag_pipeline::event::{sequences, EventManager};
use krag_pipeline::expansion::ContextExpander;
use krag_pipeline::plugins::{
    ChunkMerger, ChunkSearcher, PromptAssembler, QueryPreprocessor, QueryRewriter,
    StreamChatCompleter, StreamFilter, TopKFilter, TracingPlugin,
};
use krag_pipeline::state::ChatState;

fn vector_result(id: &str, knowledge_id: &str, start: usize, end: usize, score: f64) -> SearchResult {
    SearchResult {
        id: id.into(),
        knowledge_id: knowledge_id.into(),
        content: format!("passage {id}"),
        start_at: start,
        end_at: end,
        score,
        match_type: MatchType::Vector,
        ..SearchResult::default()
    }
}

fn build_manager(engine: Arc<MockRetrieveEngine>, answer: &str) -> EventManager {
    let chat_model = Arc::new(MockChatModel::new(answer));
    // An empty rewrite response keeps the original query
    let rewrite_model = Arc::new(MockChatModel::new(""));
    let chunks = Arc::new(InMemoryChunkStore::new());
    let knowledge = Arc::new(InMemoryKnowledgeStore::new());

    let mut manager = EventManager::new();
    manager.register(Arc::new(QueryRewriter::new(
        rewrite_model,
        Arc::new(MockHistorySource::default()),
        ConversationConfig::default(),
    )));
    manager.register(Arc::new(QueryPreprocessor::new()));
    manager.register(Arc::new(ChunkSearcher::new(
        engine,
        ContextExpander::new(chunks, knowledge),
    )));
    manager.register(Arc::new(ChunkMerger::new()));
    manager.register(Arc::new(TopKFilter::new()));
    manager.register(Arc::new(PromptAssembler::new()));
    manager.register(Arc::new(StreamChatCompleter::new(chat_model)));
    manager.register(Arc::new(StreamFilter::new()));
    manager.register(Arc::new(TracingPlugin::new()));
    manager
}

fn state_for(query: &str) -> ChatState {
    let mut config = ConversationConfig::default();
    config.rerank_top_k = 2;
    ChatState::new("session-1", "request-1", query, "kb-1", &config)
}

#[tokio::test]
async fn three_vector_matches_filtered_to_top_two() {
    // Three vector matches above threshold, zero keyword matches. Distinct
    // knowledge ids keep the merger from combining them.
    let engine = Arc::new(MockRetrieveEngine::with_results(vec![
        vector_result("c1", "k1", 0, 10, 0.8),
        vector_result("c2", "k2", 0, 10, 0.95),
        vector_result("c3", "k3", 0, 10, 0.6),
    ]));
    let manager = build_manager(engine, "final answer");
    let mut state = state_for("what is hybrid retrieval?");

    manager
        .run_sequence(sequences::RAG_STREAM, &mut state)
        .await
        .unwrap();

    // Before the top-K filter the merger saw all three
    assert_eq!(state.search_results.len(), 3);
    // After FilterTopK(2): two results, sorted by score descending
    assert_eq!(state.merge_results.len(), 2);
    assert!(state.merge_results[0].score >= state.merge_results[1].score);
    assert_eq!(state.merge_results[0].id, "c2");
    assert_eq!(state.merge_results[1].id, "c1");

    // The prompt saw the retrieved passages and the stream carries the answer
    assert!(state.user_content.contains("passage c2"));
    let text = state.response_stream.take().unwrap().collect_text().await;
    assert_eq!(text, "final answer");
}

#[tokio::test]
async fn empty_retrieval_produces_single_fallback_event() {
    let engine = Arc::new(MockRetrieveEngine::default());
    let manager = build_manager(engine, "unused answer");
    let mut state = state_for("question with no matches");
    state.fallback_response = "I could not find anything relevant.".into();

    let result = manager.run_sequence(sequences::RAG_STREAM, &mut state).await;

    assert!(result.is_ok(), "the no-results signal is not a failure");
    assert_eq!(
        state.chat_response.as_ref().unwrap().content,
        "I could not find anything relevant."
    );

    let events = state.response_stream.take().unwrap().collect_events().await;
    assert_eq!(events.len(), 1, "exactly one terminal stream event");
    assert!(events[0].done);
    assert_eq!(events[0].response_type, ResponseType::Answer);
    assert_eq!(events[0].content, "I could not find anything relevant.");
    assert_eq!(events[0].id, "request-1");
}

#[tokio::test]
async fn overlapping_chunks_merge_before_generation() {
    let engine = Arc::new(MockRetrieveEngine::with_results(vec![
        SearchResult {
            id: "c1".into(),
            knowledge_id: "k1".into(),
            content: "abcdefghij".into(),
            start_at: 0,
            end_at: 10,
            score: 0.7,
            match_type: MatchType::Vector,
            ..SearchResult::default()
        },
        SearchResult {
            id: "c2".into(),
            knowledge_id: "k1".into(),
            content: "ghijklmn".into(),
            start_at: 6,
            end_at: 14,
            score: 0.9,
            match_type: MatchType::Vector,
            ..SearchResult::default()
        },
    ]));
    let manager = build_manager(engine, "merged answer");
    let mut state = state_for("overlap question");

    manager
        .run_sequence(sequences::RAG_STREAM, &mut state)
        .await
        .unwrap();

    assert_eq!(state.merge_results.len(), 1);
    assert_eq!(state.merge_results[0].content, "abcdefghijklmn");
    assert_eq!(state.merge_results[0].end_at, 14);
    assert_eq!(state.merge_results[0].sub_chunk_ids, vec!["c2"]);
    assert!(state.user_content.contains("abcdefghijklmn"));
}

#[tokio::test]
async fn knowledge_search_sequence_returns_results_without_generation() {
    let engine = Arc::new(MockRetrieveEngine::with_results(vec![
        vector_result("c1", "k1", 0, 10, 0.8),
        vector_result("c2", "k2", 0, 10, 0.9),
    ]));
    let manager = build_manager(engine, "should not be used");
    let mut state = state_for("retrieval only");
    state.rewrite_query = state.query.clone();

    manager
        .run_sequence(sequences::KNOWLEDGE_SEARCH, &mut state)
        .await
        .unwrap();

    assert_eq!(state.merge_results.len(), 2);
    assert!(state.chat_response.is_none());
    assert!(state.response_stream.is_none());
    assert!(state.user_content.is_empty());
}
