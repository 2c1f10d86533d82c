//! Top-K truncation of the final candidate list

use async_trait::async_trait;
use tracing::{debug, info};

use krag_core::error::Result;
use krag_core::search::SearchResult;

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Truncates whichever result list is authoritative to the configured K
pub struct TopKFilter;

impl TopKFilter {
    /// Create the filter
    pub fn new() -> Self {
        Self
    }
}

impl Default for TopKFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(results: &mut Vec<SearchResult>, top_k: usize) {
    if top_k > 0 && results.len() > top_k {
        debug!(before = results.len(), after = top_k, "truncating results");
        results.truncate(top_k);
    }
}

#[async_trait]
impl Plugin for TopKFilter {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::FilterTopK]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        let top_k = state.rerank_top_k;

        // Merge output first, then rerank, then raw search
        if !state.merge_results.is_empty() {
            truncate(&mut state.merge_results, top_k);
        } else if !state.rerank_results.is_empty() {
            truncate(&mut state.rerank_results, top_k);
        } else if !state.search_results.is_empty() {
            truncate(&mut state.search_results, top_k);
        } else {
            info!("no results to filter");
        }

        next.run(event, state).await
    }
}
