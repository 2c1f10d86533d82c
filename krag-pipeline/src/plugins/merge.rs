//! Overlap-aware chunk merging
//!
//! Groups candidates by knowledge id, sorts each group by span, and walks
//! it merging overlapping chunks: the merged chunk keeps the first chunk's
//! content plus the non-overlapping rune suffix of the next, extends its
//! end offset, records the absorbed id, takes the max score, and unions
//! image metadata deduplicated by URL.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, info};

use krag_core::chunk::ChunkType;
use krag_core::error::Result;
use krag_core::search::SearchResult;

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Merges overlapping chunks per knowledge source
pub struct ChunkMerger;

impl ChunkMerger {
    /// Create the merger
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChunkMerger {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge one knowledge group; `chunks` must be span-sorted
fn merge_group(chunks: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut iter = chunks.into_iter().peekable();

    // A leading summary chunk is its own result; content chunks never
    // merge into it
    if iter
        .peek()
        .is_some_and(|c| c.chunk_type == ChunkType::Summary)
    {
        if let Some(summary) = iter.next() {
            merged.push(summary);
        }
    }
    let Some(first) = iter.next() else {
        return merged;
    };
    merged.push(first);

    for chunk in iter {
        // merged is never empty here
        let Some(last) = merged.last_mut() else { break };

        if chunk.start_at > last.end_at {
            merged.push(chunk);
            continue;
        }

        if chunk.end_at > last.end_at {
            // Append only the rune-indexed suffix beyond the overlap
            let overlap = last.end_at - chunk.start_at;
            let suffix: String = chunk.content.chars().skip(overlap).collect();
            last.content.push_str(&suffix);
            last.end_at = chunk.end_at;
            last.sub_chunk_ids.push(chunk.id.clone());
            merge_image_info(last, &chunk);
        }
        if chunk.score > last.score {
            last.score = chunk.score;
        }
    }
    merged
}

/// Union the source's image metadata into the target, deduplicated by URL
fn merge_image_info(target: &mut SearchResult, source: &SearchResult) {
    if source.image_info.is_empty() {
        return;
    }
    let mut seen: HashSet<&str> = target.image_info.iter().map(|i| i.url.as_str()).collect();
    let mut additions = Vec::new();
    for image in &source.image_info {
        if !image.url.is_empty() && seen.insert(image.url.as_str()) {
            additions.push(image.clone());
        }
    }
    target.image_info.extend(additions);
}

#[async_trait]
impl Plugin for ChunkMerger {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::ChunkMerge]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        // Rerank output if present, else raw search output
        let source = if !state.rerank_results.is_empty() {
            state.rerank_results.clone()
        } else {
            state.search_results.clone()
        };
        if source.is_empty() {
            debug!("no chunks available for merging");
            return next.run(event, state).await;
        }

        let mut groups: BTreeMap<String, Vec<SearchResult>> = BTreeMap::new();
        for chunk in source {
            groups.entry(chunk.knowledge_id.clone()).or_default().push(chunk);
        }

        let mut merged: Vec<SearchResult> = Vec::new();
        for (knowledge_id, mut chunks) in groups {
            chunks.sort_by(|a, b| (a.start_at, a.end_at).cmp(&(b.start_at, b.end_at)));
            let before = chunks.len();
            let group = merge_group(chunks);
            debug!(
                knowledge_id = %knowledge_id,
                before,
                after = group.len(),
                "merged knowledge group"
            );
            merged.extend(group);
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        info!(count = merged.len(), "chunk merge complete");

        state.merge_results = merged;
        next.run(event, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krag_core::chunk::ImageInfo;

    fn chunk(id: &str, knowledge_id: &str, start: usize, end: usize, content: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.into(),
            knowledge_id: knowledge_id.into(),
            start_at: start,
            end_at: end,
            content: content.into(),
            score,
            ..SearchResult::default()
        }
    }

    async fn run_merge(state: &mut ChatState) {
        ChunkMerger::new()
            .on_event(EventType::ChunkMerge, state, Next::noop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn overlapping_chunks_merge_content_and_span() {
        // [0, 10) "abcdefghij" and [6, 14) "ghijklmn" overlap by 4 runes
        let mut state = ChatState::default();
        state.search_results = vec![
            chunk("a", "k1", 0, 10, "abcdefghij", 0.5),
            chunk("b", "k1", 6, 14, "ghijklmn", 0.9),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 1);
        let merged = &state.merge_results[0];
        assert_eq!(merged.content, "abcdefghijklmn");
        assert_eq!(merged.end_at, 14);
        assert_eq!(merged.sub_chunk_ids, vec!["b"]);
        assert!((merged.score - 0.9).abs() < f64::EPSILON, "max score wins");
    }

    #[tokio::test]
    async fn multibyte_overlap_is_rune_indexed()  {
        // "日本語のテキスト" spans [0, 8); the second chunk repeats the
        // last three runes before continuing
        let mut state = ChatState::default();
        state.search_results = vec![
            chunk("a", "k1", 0, 8, "日本語のテキスト", 0.5),
            chunk("b", "k1", 5, 11, "キスト追加分", 0.6),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 1);
        assert_eq!(state.merge_results[0].content, "日本語のテキスト追加分");
        assert_eq!(state.merge_results[0].end_at, 11);
    }

    #[tokio::test]
    async fn disjoint_chunks_stay_separate() {
        let mut state = ChatState::default();
        state.search_results = vec![
            chunk("a", "k1", 0, 5, "first", 0.4),
            chunk("b", "k1", 10, 15, "later", 0.8),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 2);
        // Sorted by score descending
        assert_eq!(state.merge_results[0].id, "b");
        assert_eq!(state.merge_results[1].id, "a");
    }

    #[tokio::test]
    async fn chunks_from_different_knowledge_never_merge() {
        let mut state = ChatState::default();
        state.search_results = vec![
            chunk("a", "k1", 0, 10, "abcdefghij", 0.5),
            chunk("b", "k2", 5, 15, "fghijklmno", 0.6),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 2);
    }

    #[tokio::test]
    async fn contained_chunk_is_absorbed_without_content_change() {
        let mut state = ChatState::default();
        state.search_results = vec![
            chunk("a", "k1", 0, 10, "abcdefghij", 0.5),
            chunk("b", "k1", 2, 8, "cdefgh", 0.9),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 1);
        let merged = &state.merge_results[0];
        assert_eq!(merged.content, "abcdefghij");
        assert_eq!(merged.end_at, 10);
        assert!(merged.sub_chunk_ids.is_empty());
        assert!((merged.score - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn leading_summary_chunk_is_kept_separate() {
        let mut summary = chunk("s", "k1", 0, 100, "summary of the document", 0.7);
        summary.chunk_type = ChunkType::Summary;
        let mut state = ChatState::default();
        state.search_results = vec![
            summary,
            chunk("a", "k1", 0, 10, "abcdefghij", 0.5),
            chunk("b", "k1", 6, 14, "ghijklmn", 0.6),
        ];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 2);
        let ids: Vec<&str> = state.merge_results.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"s"));
        assert!(ids.contains(&"a"));
    }

    #[tokio::test]
    async fn rerank_results_take_precedence_over_search_results() {
        let mut state = ChatState::default();
        state.search_results = vec![chunk("ignored", "k1", 0, 5, "nope", 0.1)];
        state.rerank_results = vec![chunk("kept", "k1", 0, 5, "yes", 0.9)];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 1);
        assert_eq!(state.merge_results[0].id, "kept");
    }

    #[tokio::test]
    async fn image_info_unions_dedup_by_url() {
        let image = |url: &str| ImageInfo {
            url: url.into(),
            ..ImageInfo::default()
        };
        let mut a = chunk("a", "k1", 0, 10, "abcdefghij", 0.5);
        a.image_info = vec![image("u1")];
        let mut b = chunk("b", "k1", 6, 14, "ghijklmn", 0.6);
        b.image_info = vec![image("u1"), image("u2")];
        let mut state = ChatState::default();
        state.search_results = vec![a, b];

        run_merge(&mut state).await;

        assert_eq!(state.merge_results.len(), 1);
        let urls: Vec<&str> = state.merge_results[0]
            .image_info
            .iter()
            .map(|i| i.url.as_str())
            .collect();
        assert_eq!(urls, vec!["u1", "u2"]);
    }
}
