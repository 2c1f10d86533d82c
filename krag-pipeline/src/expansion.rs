//! Context expansion around retrieval candidates
//!
//! For every candidate chunk, expansion pulls in its parent chunk (which
//! inherits the candidate's score), its previous/next neighbours (text
//! chunks only) and any chunks named in its related-chunks list. All
//! lookups are batched. Only text and summary chunks survive into the
//! final result list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use krag_core::chunk::{Chunk, ChunkType, Knowledge};
use krag_core::provider::{ChunkStore, KnowledgeStore};
use krag_core::search::{MatchType, SearchResult};

/// Batched parent/nearby/related chunk expansion
pub struct ContextExpander {
    chunk_store: Arc<dyn ChunkStore>,
    knowledge_store: Arc<dyn KnowledgeStore>,
}

impl ContextExpander {
    /// Create an expander over the given stores
    pub fn new(chunk_store: Arc<dyn ChunkStore>, knowledge_store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            chunk_store,
            knowledge_store,
        }
    }

    /// Expand the candidate set. Lookup failures degrade to the
    /// unexpanded candidates; expansion never fails a request.
    pub async fn expand(&self, candidates: Vec<SearchResult>) -> Vec<SearchResult> {
        if candidates.is_empty() {
            return candidates;
        }

        let ids: Vec<String> = candidates.iter().map(|r| r.id.clone()).collect();
        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut match_types: HashMap<String, MatchType> = HashMap::new();
        for candidate in &candidates {
            scores.insert(candidate.id.clone(), candidate.score);
            match_types.insert(candidate.id.clone(), candidate.match_type);
        }

        let base_chunks = match self.chunk_store.chunks_by_id(&ids).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "failed to fetch candidate chunks, skipping expansion");
                return filter_terminal(candidates);
            }
        };

        // Collect additional chunk ids to fetch, each exactly once
        let mut processed: HashSet<String> = ids.iter().cloned().collect();
        let mut additional: Vec<String> = Vec::new();
        for chunk in &base_chunks {
            if let Some(parent_id) = &chunk.parent_chunk_id {
                if processed.insert(parent_id.clone()) {
                    additional.push(parent_id.clone());
                    // The parent inherits the matched child's score
                    let score = scores.get(&chunk.id).copied().unwrap_or(0.0);
                    scores.insert(parent_id.clone(), score);
                    match_types.insert(parent_id.clone(), MatchType::ParentChunk);
                }
            }

            for related_id in &chunk.relation_chunks {
                if processed.insert(related_id.clone()) {
                    additional.push(related_id.clone());
                    match_types.insert(related_id.clone(), MatchType::RelationChunk);
                }
            }

            // Neighbours only widen plain text matches
            if chunk.chunk_type == ChunkType::Text {
                for neighbour in [&chunk.next_chunk_id, &chunk.pre_chunk_id].into_iter().flatten() {
                    if processed.insert(neighbour.clone()) {
                        additional.push(neighbour.clone());
                        match_types.insert(neighbour.clone(), MatchType::NearbyChunk);
                    }
                }
            }
        }

        if additional.is_empty() {
            return filter_terminal(candidates);
        }
        debug!(count = additional.len(), "fetching additional context chunks");

        let additional_chunks = match self.chunk_store.chunks_by_id(&additional).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "failed to fetch additional chunks, continuing without them");
                Vec::new()
            }
        };

        let knowledge_map = self.fetch_knowledge(&additional_chunks).await;

        let mut results = filter_terminal(candidates);
        for chunk in &additional_chunks {
            if !chunk.chunk_type.is_terminal() {
                continue;
            }
            let Some(knowledge) = knowledge_map.get(&chunk.knowledge_id) else {
                warn!(chunk_id = %chunk.id, "missing knowledge record for expanded chunk");
                continue;
            };
            let score = scores.get(&chunk.id).copied().unwrap_or(0.0);
            let match_type = match_types
                .get(&chunk.id)
                .copied()
                .unwrap_or(MatchType::ParentChunk);
            results.push(SearchResult::from_chunk(chunk, knowledge, score, match_type));
        }
        results
    }

    async fn fetch_knowledge(&self, chunks: &[Chunk]) -> HashMap<String, Knowledge> {
        let mut knowledge_ids: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for chunk in chunks {
            if seen.insert(chunk.knowledge_id.clone()) {
                knowledge_ids.push(chunk.knowledge_id.clone());
            }
        }
        if knowledge_ids.is_empty() {
            return HashMap::new();
        }

        match self.knowledge_store.knowledge_batch(&knowledge_ids).await {
            Ok(records) => records.into_iter().map(|k| (k.id.clone(), k)).collect(),
            Err(err) => {
                warn!(error = %err, "failed to fetch knowledge records for expansion");
                HashMap::new()
            }
        }
    }
}

/// Drop candidates whose chunk type cannot be a terminal retrieval result
fn filter_terminal(candidates: Vec<SearchResult>) -> Vec<SearchResult> {
    candidates
        .into_iter()
        .filter(|r| r.chunk_type.is_terminal())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::provider::mock::{InMemoryChunkStore, InMemoryKnowledgeStore};

    fn stores() -> (Arc<InMemoryChunkStore>, Arc<InMemoryKnowledgeStore>) {
        let chunks = Arc::new(InMemoryChunkStore::new());
        let knowledge = Arc::new(InMemoryKnowledgeStore::new());
        knowledge.insert(Knowledge {
            id: "k1".into(),
            title: "doc".into(),
            ..Knowledge::default()
        });
        (chunks, knowledge)
    }

    fn chunk(id: &str, chunk_type: ChunkType) -> Chunk {
        Chunk {
            id: id.into(),
            knowledge_id: "k1".into(),
            content: format!("content of {id}"),
            chunk_type,
            ..Chunk::default()
        }
    }

    fn candidate(id: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            knowledge_id: "k1".into(),
            score,
            ..SearchResult::default()
        }
    }

    #[tokio::test]
    async fn parent_inherits_score_and_tag() {
        let (chunks, knowledge) = stores();
        let mut matched = chunk("c1", ChunkType::Text);
        matched.parent_chunk_id = Some("p1".into());
        chunks.insert(matched);
        chunks.insert(chunk("p1", ChunkType::Text));

        let expander = ContextExpander::new(chunks, knowledge);
        let results = expander.expand(vec![candidate("c1", 0.8)]).await;

        let parent = results.iter().find(|r| r.id == "p1").expect("parent present");
        assert_eq!(parent.match_type, MatchType::ParentChunk);
        assert!((parent.score - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn neighbours_expand_text_chunks_only() {
        let (chunks, knowledge) = stores();
        let mut summary = chunk("s1", ChunkType::Summary);
        summary.next_chunk_id = Some("n1".into());
        chunks.insert(summary);
        let mut text = chunk("c1", ChunkType::Text);
        text.pre_chunk_id = Some("b1".into());
        chunks.insert(text);
        chunks.insert(chunk("n1", ChunkType::Text));
        chunks.insert(chunk("b1", ChunkType::Text));

        let expander = ContextExpander::new(chunks, knowledge);
        let results = expander
            .expand(vec![candidate("s1", 0.9), candidate("c1", 0.7)])
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"b1"), "text chunk neighbour expanded");
        assert!(!ids.contains(&"n1"), "summary chunk neighbours are not expanded");
        let nearby = results.iter().find(|r| r.id == "b1").expect("neighbour");
        assert_eq!(nearby.match_type, MatchType::NearbyChunk);
        assert!((nearby.score - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn non_terminal_chunks_are_filtered_out() {
        let (chunks, knowledge) = stores();
        let mut matched = chunk("c1", ChunkType::Text);
        matched.relation_chunks = vec!["e1".into(), "r1".into()];
        chunks.insert(matched);
        chunks.insert(chunk("e1", ChunkType::Entity));
        chunks.insert(chunk("r1", ChunkType::Text));

        let expander = ContextExpander::new(chunks, knowledge);
        let mut ocr_candidate = candidate("o1", 0.6);
        ocr_candidate.chunk_type = ChunkType::ImageOcr;
        let results = expander
            .expand(vec![candidate("c1", 0.8), ocr_candidate])
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"c1"));
        assert!(ids.contains(&"r1"), "terminal related chunk kept");
        assert!(!ids.contains(&"e1"), "entity chunk filtered");
        assert!(!ids.contains(&"o1"), "non-terminal candidate filtered");
        let related = results.iter().find(|r| r.id == "r1").expect("related");
        assert_eq!(related.match_type, MatchType::RelationChunk);
    }

    #[tokio::test]
    async fn each_chunk_expanded_once() {
        let (chunks, knowledge) = stores();
        let mut a = chunk("a", ChunkType::Text);
        a.parent_chunk_id = Some("p".into());
        let mut b = chunk("b", ChunkType::Text);
        b.parent_chunk_id = Some("p".into());
        chunks.insert(a);
        chunks.insert(b);
        chunks.insert(chunk("p", ChunkType::Text));

        let expander = ContextExpander::new(chunks, knowledge);
        let results = expander
            .expand(vec![candidate("a", 0.9), candidate("b", 0.5)])
            .await;

        let parents = results.iter().filter(|r| r.id == "p").count();
        assert_eq!(parents, 1);
        // First mention wins: the parent carries chunk a's score
        let parent = results.iter().find(|r| r.id == "p").expect("parent");
        assert!((parent.score - 0.9).abs() < f64::EPSILON);
    }
}
