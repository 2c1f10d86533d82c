//! Hybrid vector + keyword search with history fusion

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use krag_core::error::{Error, Result};
use krag_core::message::HistoryTurn;
use krag_core::provider::RetrieveEngine;
use krag_core::search::{dedupe_by_chunk_id, MatchType, SearchParams, SearchResult};

use crate::event::{EventType, Next, Plugin};
use crate::expansion::ContextExpander;
use crate::state::ChatState;

/// Runs hybrid search, context expansion and history fusion
pub struct ChunkSearcher {
    engine: Arc<dyn RetrieveEngine>,
    expander: ContextExpander,
}

impl ChunkSearcher {
    /// Create the searcher over a retrieval engine and expansion stores
    pub fn new(engine: Arc<dyn RetrieveEngine>, expander: ContextExpander) -> Self {
        Self { engine, expander }
    }

    async fn query_engine(&self, state: &ChatState, query_text: &str) -> Result<Vec<SearchResult>> {
        let params = SearchParams {
            query_text: query_text.trim().to_string(),
            vector_threshold: state.vector_threshold,
            keyword_threshold: state.keyword_threshold,
            match_count: state.embedding_top_k,
        };
        debug!(query = %params.query_text, top_k = params.match_count, "hybrid search");
        self.engine
            .hybrid_search(&state.knowledge_base_id, &params)
            .await
            .map_err(|e| Error::search(e.to_string()))
    }
}

/// Knowledge references of the most recent turn that has any,
/// re-tagged as history matches
fn latest_history_references(history: &[HistoryTurn]) -> Vec<SearchResult> {
    for turn in history.iter().rev() {
        if !turn.knowledge_references.is_empty() {
            return turn
                .knowledge_references
                .iter()
                .cloned()
                .map(|mut reference| {
                    reference.match_type = MatchType::History;
                    reference
                })
                .collect();
        }
    }
    Vec::new()
}

#[async_trait]
impl Plugin for ChunkSearcher {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::ChunkSearch]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let mut engine_results = self.query_engine(state, &state.rewrite_query.clone()).await?;

        // The preprocessed query widens recall when it differs
        if state.processed_query != state.rewrite_query && !state.processed_query.trim().is_empty()
        {
            let second = self
                .query_engine(state, &state.processed_query.clone())
                .await?;
            debug!(count = second.len(), "second search with preprocessed query");
            engine_results.extend(second);
        }

        let engine_results = dedupe_by_chunk_id(engine_results);
        let mut results = self.expander.expand(engine_results).await;

        let history_results = latest_history_references(&state.history);
        if !history_results.is_empty() {
            debug!(count = history_results.len(), "adding history references");
            results.extend(history_results);
        }

        state.search_results = dedupe_by_chunk_id(results);

        if state.search_results.is_empty() {
            info!(session_id = %state.session_id, "no search results");
            return Err(Error::NoRelevantContent);
        }
        info!(
            session_id = %state.session_id,
            count = state.search_results.len(),
            "search results collected"
        );
        next.run(event, state).await
    }
}
