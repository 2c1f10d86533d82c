//! Second-pass relevance scoring
//!
//! Reranks the candidate set against the rewritten query, falling back to
//! the preprocessed and then the raw query when a pass yields nothing.
//! History-tagged candidates get a relaxed threshold to favor
//! conversational continuity.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use krag_core::error::{Error, Result};
use krag_core::provider::{RankResult, Reranker};
use krag_core::search::{MatchType, SearchResult};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// How much the threshold is relaxed for history matches.
/// Tunable; the value is a heuristic favoring conversational continuity.
pub const HISTORY_THRESHOLD_RELAXATION: f64 = 0.1;

/// The relaxed threshold never drops below this floor
pub const HISTORY_THRESHOLD_FLOOR: f64 = 0.5;

/// Reranks candidates and filters them by relevance threshold
pub struct ResultReranker {
    reranker: Arc<dyn Reranker>,
}

impl ResultReranker {
    /// Create the reranker plugin
    pub fn new(reranker: Arc<dyn Reranker>) -> Self {
        Self { reranker }
    }

    /// One rerank attempt: score, then filter by threshold.
    /// Model errors degrade to an empty attempt.
    async fn attempt(
        &self,
        state: &ChatState,
        query: &str,
        passages: &[String],
    ) -> Vec<RankResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        debug!(query, passage_count = passages.len(), "rerank attempt");

        let ranked = match self.reranker.rerank(query, passages).await {
            Ok(ranked) => ranked,
            Err(err) => {
                warn!(error = %err, "rerank call failed");
                return Vec::new();
            }
        };

        ranked
            .into_iter()
            .filter(|r| {
                let mut threshold = state.rerank_threshold;
                if let Some(candidate) = state.search_results.get(r.index) {
                    if candidate.match_type == MatchType::History {
                        threshold =
                            (threshold - HISTORY_THRESHOLD_RELAXATION).max(HISTORY_THRESHOLD_FLOOR);
                    }
                }
                r.score > threshold
            })
            .collect()
    }
}

/// Passage text submitted for scoring: the chunk content enriched with
/// any image captions and OCR text
fn enriched_passage(result: &SearchResult) -> String {
    if result.image_info.is_empty() {
        return result.content.clone();
    }

    let mut image_texts = Vec::new();
    for image in &result.image_info {
        if !image.caption.is_empty() {
            image_texts.push(format!("Image caption: {}", image.caption));
        }
        if !image.ocr_text.is_empty() {
            image_texts.push(format!("Image text: {}", image.ocr_text));
        }
    }
    if image_texts.is_empty() {
        return result.content.clone();
    }

    let mut passage = result.content.clone();
    if !passage.is_empty() {
        passage.push_str("\n\n");
    }
    passage.push_str(&image_texts.join("\n"));
    passage
}

#[async_trait]
impl Plugin for ResultReranker {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::ChunkRerank]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        if state.search_results.is_empty() {
            debug!("no search results, skipping rerank");
            return next.run(event, state).await;
        }
        if state.rerank_model_id.is_empty() {
            warn!("no rerank model configured, skipping rerank");
            return next.run(event, state).await;
        }

        let passages: Vec<String> = state.search_results.iter().map(enriched_passage).collect();

        // Query variants in priority order; first non-empty pass wins
        let mut ranked = self
            .attempt(state, &state.rewrite_query.clone(), &passages)
            .await;
        if ranked.is_empty() {
            ranked = self
                .attempt(state, &state.processed_query.clone(), &passages)
                .await;
        }
        if ranked.is_empty() {
            ranked = self.attempt(state, &state.query.clone(), &passages).await;
        }

        let mut results = Vec::with_capacity(ranked.len());
        for rank in &ranked {
            if let Some(candidate) = state.search_results.get(rank.index) {
                let mut scored = candidate.clone();
                scored.score = rank.score;
                results.push(scored);
            }
        }
        state.rerank_results = results;

        if state.rerank_results.is_empty() {
            warn!("reranking produced no results above threshold");
            return Err(Error::NoRelevantContent);
        }
        info!(count = state.rerank_results.len(), "reranking complete");
        next.run(event, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::chunk::ImageInfo;
    use krag_core::provider::mock::MockReranker;

    fn candidate(id: &str, match_type: MatchType) -> SearchResult {
        SearchResult {
            id: id.into(),
            content: format!("content {id}"),
            match_type,
            ..SearchResult::default()
        }
    }

    fn rank(index: usize, score: f64) -> RankResult {
        RankResult {
            index,
            score,
            document: None,
        }
    }

    fn state_with_candidates(candidates: Vec<SearchResult>) -> ChatState {
        let mut state = ChatState::default();
        state.search_results = candidates;
        state.rerank_model_id = "rr-1".into();
        state.rerank_threshold = 0.7;
        state.rewrite_query = "query".into();
        state.processed_query = "query".into();
        state.query = "query".into();
        state
    }

    #[tokio::test]
    async fn history_candidates_get_a_relaxed_threshold() {
        // threshold 0.7, relaxed for history to max(0.6, 0.5) = 0.6.
        // Both candidates score threshold - 0.08 = 0.62.
        let plugin = ResultReranker::new(Arc::new(MockReranker::with_scripts(vec![vec![
            rank(0, 0.62),
            rank(1, 0.62),
        ]])));
        let mut state = state_with_candidates(vec![
            candidate("h", MatchType::History),
            candidate("v", MatchType::Vector),
        ]);

        plugin
            .on_event(EventType::ChunkRerank, &mut state, Next::noop())
            .await
            .unwrap();

        assert_eq!(state.rerank_results.len(), 1);
        assert_eq!(state.rerank_results[0].id, "h");
        assert!((state.rerank_results[0].score - 0.62).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn relaxed_threshold_never_drops_below_the_floor() {
        // threshold 0.55: relaxation would give 0.45, the floor keeps 0.5
        let plugin = ResultReranker::new(Arc::new(MockReranker::with_scripts(vec![vec![
            rank(0, 0.48),
        ]])));
        let mut state = state_with_candidates(vec![candidate("h", MatchType::History)]);
        state.rerank_threshold = 0.55;

        let result = plugin
            .on_event(EventType::ChunkRerank, &mut state, Next::noop())
            .await;

        assert!(matches!(result, Err(Error::NoRelevantContent)));
    }

    #[tokio::test]
    async fn retries_with_fallback_queries_until_non_empty() {
        // First two attempts yield nothing, the third passes
        let plugin = ResultReranker::new(Arc::new(MockReranker::with_scripts(vec![
            vec![],
            vec![],
            vec![rank(0, 0.9)],
        ])));
        let mut state = state_with_candidates(vec![candidate("a", MatchType::Vector)]);
        state.rewrite_query = "rewritten".into();
        state.processed_query = "processed".into();
        state.query = "raw".into();

        plugin
            .on_event(EventType::ChunkRerank, &mut state, Next::noop())
            .await
            .unwrap();

        assert_eq!(state.rerank_results.len(), 1);
    }

    #[tokio::test]
    async fn missing_rerank_model_skips_the_stage() {
        let plugin = ResultReranker::new(Arc::new(MockReranker::uniform(0.9)));
        let mut state = state_with_candidates(vec![candidate("a", MatchType::Vector)]);
        state.rerank_model_id = String::new();

        plugin
            .on_event(EventType::ChunkRerank, &mut state, Next::noop())
            .await
            .unwrap();

        assert!(state.rerank_results.is_empty());
    }

    #[tokio::test]
    async fn passages_include_image_captions_and_ocr() {
        let mut with_image = candidate("a", MatchType::Vector);
        with_image.image_info = vec![ImageInfo {
            caption: "a diagram".into(),
            ocr_text: "labels".into(),
            ..ImageInfo::default()
        }];

        let passage = enriched_passage(&with_image);
        assert!(passage.contains("content a"));
        assert!(passage.contains("Image caption: a diagram"));
        assert!(passage.contains("Image text: labels"));
    }
}
