//! # KRAG Graph
//!
//! Offline knowledge-graph construction: per-document entity and
//! relationship extraction under bounded concurrency, PMI-based edge
//! weights, and a weighted chunk adjacency graph consumed by the
//! graph-expansion stage of retrieval.
//!
//! ```no_run
//! use std::sync::Arc;
//! use krag_core::provider::mock::MockChatModel;
//! use krag_graph::{GraphBuilder, GraphConfig};
//!
//! # async fn run(chunks: Vec<krag_core::chunk::Chunk>) -> krag_core::error::Result<()> {
//! let builder = GraphBuilder::new(
//!     GraphConfig::default(),
//!     Arc::new(MockChatModel::new("[]")),
//! );
//! builder.build_graph(&chunks).await?;
//!
//! let related = builder.relation_chunks("chunk-1", 10);
//! let second_degree = builder.indirect_relation_chunks("chunk-1", 10);
//! # let _ = (related, second_degree);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod builder;
pub mod chunk_graph;
pub mod export;

pub use builder::{Entity, GraphBuilder, GraphConfig, Relationship};
pub use chunk_graph::{ChunkGraph, ChunkRelation, INDIRECT_WEIGHT_DECAY};
pub use export::mermaid_diagram;
