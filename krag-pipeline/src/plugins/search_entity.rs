//! Graph-based entity search
//!
//! Looks up extracted entity names in the graph store and pulls in the
//! chunks attached to matched nodes that retrieval has not already seen.
//! Lookup failures are soft; an empty combined candidate set raises the
//! "no results" signal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use krag_core::chunk::Knowledge;
use krag_core::error::{Error, Result};
use krag_core::provider::{ChunkStore, GraphData, GraphStore, KnowledgeStore, Namespace};
use krag_core::search::{dedupe_by_chunk_id, MatchType, SearchResult};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Graph candidates carry a fixed score: graph adjacency has no
/// similarity measure comparable to retrieval scores
const GRAPH_MATCH_SCORE: f64 = 1.0;

/// Adds graph-derived chunks to the candidate set
pub struct EntitySearcher {
    graph_store: Arc<dyn GraphStore>,
    chunk_store: Arc<dyn ChunkStore>,
    knowledge_store: Arc<dyn KnowledgeStore>,
}

impl EntitySearcher {
    /// Create the searcher over the graph and lookup stores
    pub fn new(
        graph_store: Arc<dyn GraphStore>,
        chunk_store: Arc<dyn ChunkStore>,
        knowledge_store: Arc<dyn KnowledgeStore>,
    ) -> Self {
        Self {
            graph_store,
            chunk_store,
            knowledge_store,
        }
    }
}

/// Chunk ids attached to matched nodes that are not in the result set yet
fn unseen_chunk_ids(graph: &GraphData, results: &[SearchResult]) -> Vec<String> {
    let mut seen: HashSet<String> = results.iter().map(|r| r.id.clone()).collect();
    let mut chunk_ids = Vec::new();
    for node in &graph.nodes {
        for chunk_id in &node.chunks {
            if seen.insert(chunk_id.clone()) {
                chunk_ids.push(chunk_id.clone());
            }
        }
    }
    chunk_ids
}

#[async_trait]
impl Plugin for EntitySearcher {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::EntitySearch]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        if state.entities.is_empty() {
            debug!("no entities extracted, skipping entity search");
            return next.run(event, state).await;
        }

        let namespace = Namespace::knowledge_base(&state.knowledge_base_id);
        let graph = match self.graph_store.search_node(&namespace, &state.entities).await {
            Ok(graph) => graph,
            Err(err) => {
                warn!(error = %err, session_id = %state.session_id, "graph node lookup failed");
                return next.run(event, state).await;
            }
        };
        info!(node_count = graph.nodes.len(), "entity search matched nodes");

        let chunk_ids = unseen_chunk_ids(&graph, &state.search_results);
        state.graph_result = Some(graph);
        if chunk_ids.is_empty() {
            debug!("no new chunks reachable through matched entities");
            return next.run(event, state).await;
        }

        let chunks = match self.chunk_store.chunks_by_id(&chunk_ids).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, session_id = %state.session_id, "failed to fetch graph chunks");
                return next.run(event, state).await;
            }
        };

        let mut knowledge_ids: Vec<String> = Vec::new();
        let mut seen_knowledge = HashSet::new();
        for chunk in &chunks {
            if seen_knowledge.insert(chunk.knowledge_id.clone()) {
                knowledge_ids.push(chunk.knowledge_id.clone());
            }
        }
        let knowledge_map: HashMap<String, Knowledge> =
            match self.knowledge_store.knowledge_batch(&knowledge_ids).await {
                Ok(records) => records.into_iter().map(|k| (k.id.clone(), k)).collect(),
                Err(err) => {
                    warn!(error = %err, session_id = %state.session_id, "failed to fetch knowledge for graph chunks");
                    return next.run(event, state).await;
                }
            };

        for chunk in &chunks {
            if let Some(knowledge) = knowledge_map.get(&chunk.knowledge_id) {
                state.search_results.push(SearchResult::from_chunk(
                    chunk,
                    knowledge,
                    GRAPH_MATCH_SCORE,
                    MatchType::Graph,
                ));
            }
        }
        state.search_results = dedupe_by_chunk_id(std::mem::take(&mut state.search_results));

        if state.search_results.is_empty() {
            info!(session_id = %state.session_id, "no results after entity search");
            return Err(Error::NoRelevantContent);
        }
        info!(
            session_id = %state.session_id,
            count = state.search_results.len(),
            "entity search complete"
        );
        next.run(event, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::chunk::Chunk;
    use krag_core::provider::mock::{
        InMemoryChunkStore, InMemoryKnowledgeStore, MockGraphStore,
    };
    use krag_core::provider::GraphNode;

    fn setup(graph: GraphData) -> EntitySearcher {
        let chunk_store = Arc::new(InMemoryChunkStore::new());
        chunk_store.insert(Chunk {
            id: "g1".into(),
            knowledge_id: "k1".into(),
            content: "graph chunk".into(),
            ..Chunk::default()
        });
        let knowledge_store = Arc::new(InMemoryKnowledgeStore::new());
        knowledge_store.insert(Knowledge {
            id: "k1".into(),
            title: "doc".into(),
            ..Knowledge::default()
        });
        EntitySearcher::new(
            Arc::new(MockGraphStore::with_graph(graph)),
            chunk_store,
            knowledge_store,
        )
    }

    fn graph_with_chunks(name: &str, chunks: Vec<String>) -> GraphData {
        GraphData {
            nodes: vec![GraphNode {
                name: name.into(),
                chunks,
                ..GraphNode::default()
            }],
            relations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn no_entities_skips_the_stage() {
        let plugin = setup(GraphData::default());
        let mut state = ChatState::default();
        state.search_results = vec![SearchResult {
            id: "a".into(),
            ..SearchResult::default()
        }];

        plugin
            .on_event(EventType::EntitySearch, &mut state, Next::noop())
            .await
            .unwrap();

        assert_eq!(state.search_results.len(), 1);
        assert!(state.graph_result.is_none());
    }

    #[tokio::test]
    async fn graph_chunks_join_the_candidates() {
        let plugin = setup(graph_with_chunks("Rust", vec!["g1".into()]));
        let mut state = ChatState::default();
        state.entities = vec!["Rust".into()];
        state.search_results = vec![SearchResult {
            id: "a".into(),
            score: 0.8,
            ..SearchResult::default()
        }];

        plugin
            .on_event(EventType::EntitySearch, &mut state, Next::noop())
            .await
            .unwrap();

        assert_eq!(state.search_results.len(), 2);
        let graph_hit = state.search_results.iter().find(|r| r.id == "g1").unwrap();
        assert_eq!(graph_hit.match_type, MatchType::Graph);
        assert!((graph_hit.score - GRAPH_MATCH_SCORE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn already_seen_chunks_are_not_added_twice() {
        let plugin = setup(graph_with_chunks("Rust", vec!["g1".into()]));
        let mut state = ChatState::default();
        state.entities = vec!["Rust".into()];
        state.search_results = vec![SearchResult {
            id: "g1".into(),
            score: 0.8,
            match_type: MatchType::Vector,
            ..SearchResult::default()
        }];

        plugin
            .on_event(EventType::EntitySearch, &mut state, Next::noop())
            .await
            .unwrap();

        assert_eq!(state.search_results.len(), 1);
        // The original vector hit is untouched
        assert_eq!(state.search_results[0].match_type, MatchType::Vector);
    }

    #[tokio::test]
    async fn empty_combined_set_raises_the_sentinel() {
        // The matched node references a chunk the store does not have
        let plugin = setup(graph_with_chunks("Rust", vec!["missing".into()]));
        let mut state = ChatState::default();
        state.entities = vec!["Rust".into()];

        let result = plugin
            .on_event(EventType::EntitySearch, &mut state, Next::noop())
            .await;

        assert!(matches!(result, Err(Error::NoRelevantContent)));
    }
}
