//! Search result types and deduplication
//!
//! A [`SearchResult`] records both the retrieved passage and *why* it was
//! retrieved (its [`MatchType`]), which later stages use for threshold
//! handling and ranking.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::chunk::{Chunk, ChunkType, ImageInfo, Knowledge};

/// Why a result was included in the candidate set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Vector similarity hit
    Vector,
    /// Keyword search hit
    Keyword,
    /// Carried over from a previous conversation turn
    History,
    /// Reached through a knowledge-graph entity
    Graph,
    /// Parent of a matched chunk, pulled in during expansion
    ParentChunk,
    /// Previous/next neighbour of a matched chunk
    NearbyChunk,
    /// Listed in a matched chunk's related-chunks set
    RelationChunk,
}

/// Parameters for one hybrid search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    /// Query text
    pub query_text: String,
    /// Minimum score for vector matches
    pub vector_threshold: f64,
    /// Minimum score for keyword matches
    pub keyword_threshold: f64,
    /// Number of candidates to request per retriever
    pub match_count: usize,
}

/// One retrieved passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk id; identity key for deduplication
    pub id: String,
    /// Passage text
    pub content: String,
    /// Owning knowledge record
    pub knowledge_id: String,
    /// Chunk position within its document
    pub chunk_index: usize,
    /// Title of the owning knowledge record
    pub knowledge_title: String,
    /// Starting character offset in the original text
    pub start_at: usize,
    /// Ending character offset in the original text (exclusive)
    pub end_at: usize,
    /// Relevance score; rewritten by reranking when it runs
    pub score: f64,
    /// Why this result was included
    pub match_type: MatchType,
    /// Ids of chunks absorbed into this one during merging
    pub sub_chunk_ids: Vec<String>,
    /// Knowledge metadata carried along for the transport layer
    pub metadata: HashMap<String, String>,
    /// Chunk content classification
    pub chunk_type: ChunkType,
    /// Parent chunk id if any
    pub parent_chunk_id: Option<String>,
    /// Images embedded in the passage
    pub image_info: Vec<ImageInfo>,
    /// Original file name of the knowledge record
    pub knowledge_filename: String,
    /// Origin of the knowledge record
    pub knowledge_source: String,
}

impl Default for SearchResult {
    fn default() -> Self {
        Self {
            id: String::new(),
            content: String::new(),
            knowledge_id: String::new(),
            chunk_index: 0,
            knowledge_title: String::new(),
            start_at: 0,
            end_at: 0,
            score: 0.0,
            match_type: MatchType::Vector,
            sub_chunk_ids: Vec::new(),
            metadata: HashMap::new(),
            chunk_type: ChunkType::Text,
            parent_chunk_id: None,
            image_info: Vec::new(),
            knowledge_filename: String::new(),
            knowledge_source: String::new(),
        }
    }
}

impl SearchResult {
    /// Build a result from a chunk and its knowledge record
    pub fn from_chunk(
        chunk: &Chunk,
        knowledge: &Knowledge,
        score: f64,
        match_type: MatchType,
    ) -> Self {
        Self {
            id: chunk.id.clone(),
            content: chunk.content.clone(),
            knowledge_id: chunk.knowledge_id.clone(),
            chunk_index: chunk.chunk_index,
            knowledge_title: knowledge.title.clone(),
            start_at: chunk.start_at,
            end_at: chunk.end_at,
            score,
            match_type,
            metadata: knowledge.metadata.clone(),
            chunk_type: chunk.chunk_type,
            parent_chunk_id: chunk.parent_chunk_id.clone(),
            image_info: chunk.image_info.clone(),
            knowledge_filename: knowledge.file_name.clone(),
            knowledge_source: knowledge.source.clone(),
            ..Self::default()
        }
    }
}

/// Drop duplicate chunk ids, keeping the first occurrence of each.
///
/// Idempotent and order-preserving: running it twice yields the same list.
pub fn dedupe_by_chunk_id(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::with_capacity(results.len());
    results
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}
