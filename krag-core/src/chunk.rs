//! Document chunk and knowledge record types
//!
//! Chunks are the retrieval unit: contiguous spans of a source document,
//! each tracking its character span and its neighbours so retrieval can
//! expand context around a hit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Classification of a chunk's content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Plain document text
    #[default]
    Text,
    /// A document-level summary
    Summary,
    /// OCR text extracted from an embedded image
    ImageOcr,
    /// A generated caption for an embedded image
    ImageCaption,
    /// An entity node materialized as a chunk
    Entity,
    /// A relationship edge materialized as a chunk
    Relationship,
}

impl ChunkType {
    /// Only text and summary chunks are valid terminal retrieval results;
    /// the other types are supporting signals consumed during expansion.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Text | Self::Summary)
    }
}

/// Metadata about an image embedded in a chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Stored image URL
    pub url: String,
    /// URL the image was originally fetched from
    pub original_url: String,
    /// Start offset of the image reference in the chunk text
    pub start_pos: usize,
    /// End offset of the image reference in the chunk text
    pub end_pos: usize,
    /// Generated caption
    pub caption: String,
    /// OCR text extracted from the image
    pub ocr_text: String,
}

/// A contiguous span of a source document used as the retrieval unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier
    pub id: String,
    /// Owning knowledge record
    pub knowledge_id: String,
    /// Owning knowledge base
    pub knowledge_base_id: String,
    /// Text content
    pub content: String,
    /// Position of this chunk in the original document's chunk sequence
    pub chunk_index: usize,
    /// Whether the chunk participates in retrieval
    pub is_enabled: bool,
    /// Starting character offset in the original text
    pub start_at: usize,
    /// Ending character offset in the original text (exclusive)
    pub end_at: usize,
    /// Previous chunk in document order
    pub pre_chunk_id: Option<String>,
    /// Next chunk in document order
    pub next_chunk_id: Option<String>,
    /// Content classification
    pub chunk_type: ChunkType,
    /// Parent chunk, set on derived chunks such as image OCR/captions
    pub parent_chunk_id: Option<String>,
    /// Chunks related through the knowledge graph
    pub relation_chunks: Vec<String>,
    /// Second-degree related chunks
    pub indirect_relation_chunks: Vec<String>,
    /// Images embedded in this chunk
    pub image_info: Vec<ImageInfo>,
}

/// A knowledge record: one ingested document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Knowledge {
    /// Unique identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Original file name for file-based knowledge
    pub file_name: String,
    /// Origin of the knowledge, e.g. "file" or "url"
    pub source: String,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}
