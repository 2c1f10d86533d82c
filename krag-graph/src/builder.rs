//! Knowledge graph construction
//!
//! One [`GraphBuilder`] per document ingestion: it extracts entities and
//! relationships from the document's chunks with the chat model, computes
//! information-theoretic edge weights, and materializes the weighted
//! chunk adjacency graph consumed by graph-based retrieval expansion.
//!
//! Entity extraction runs under a bounded worker pool and is fail-fast:
//! the first failure aborts the build. Relationship extraction runs under
//! its own pool and is best-effort: failed batches are logged and
//! skipped. The builder's maps are guarded by a single read-write lock
//! which is never held across a model call.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use krag_core::chunk::Chunk;
use krag_core::error::{Error, Result};
use krag_core::extract::parse_llm_json;
use krag_core::message::{ChatOptions, Message};
use krag_core::provider::{ChatModel, GraphData, GraphNode, GraphRelation};

use crate::chunk_graph::{ChunkGraph, ChunkRelation};

/// Proportion of PMI in the combined relationship weight
pub const PMI_WEIGHT: f64 = 0.6;
/// Proportion of asserted strength in the combined relationship weight
pub const STRENGTH_WEIGHT: f64 = 0.4;
/// Lower bound of the weight range, also guards normalization
pub const MIN_WEIGHT_VALUE: f64 = 1.0;
/// Upper bound of the weight range
pub const MAX_WEIGHT_VALUE: f64 = 10.0;
/// Scale factor mapping the combined score onto the weight range
const WEIGHT_SCALE_FACTOR: f64 = 9.0;
/// Relationship extraction needs at least this many entities
const MIN_ENTITIES_FOR_RELATION: usize = 2;

const DEFAULT_ENTITY_PROMPT: &str = "Identify the entities mentioned in the text: concepts, \
people, organizations, places and products. Answer with a fenced JSON list of objects, one \
per entity: {\"title\": name, \"description\": one-sentence description}. Use the exact \
surface form of each entity as its title.";

const DEFAULT_RELATIONSHIP_PROMPT: &str = "Given a list of entities and the text they were \
extracted from, identify the relationships between them. Answer with a fenced JSON list of \
objects: {\"source\": entity title, \"target\": entity title, \"description\": how they \
relate, \"strength\": 1-10}. Only relate entities from the given list.";

/// Construction parameters for one graph build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Worker-pool size for entity extraction
    pub entity_concurrency: usize,
    /// Worker-pool size for relationship extraction
    pub relation_concurrency: usize,
    /// Chunks per relationship-extraction batch
    pub relation_batch_size: usize,
    /// Extraction sampling temperature; low for deterministic results
    pub temperature: f64,
    /// System prompt for entity extraction
    pub entity_prompt: String,
    /// System prompt for relationship extraction
    pub relationship_prompt: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            entity_concurrency: 4,
            relation_concurrency: 4,
            relation_batch_size: 5,
            temperature: 0.1,
            entity_prompt: DEFAULT_ENTITY_PROMPT.to_string(),
            relationship_prompt: DEFAULT_RELATIONSHIP_PROMPT.to_string(),
        }
    }
}

/// A node of the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: String,
    /// Display name; the exact-match deduplication key
    pub title: String,
    /// Short description from extraction
    pub description: String,
    /// Number of times the entity was extracted
    pub frequency: usize,
    /// Chunks the entity appears in
    pub chunk_ids: Vec<String>,
    /// Connections to other entities, set by the degree pass
    pub degree: usize,
}

/// An edge of the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier
    pub id: String,
    /// Source entity title
    pub source: String,
    /// Target entity title
    pub target: String,
    /// How the entities relate
    pub description: String,
    /// Model-asserted strength, running-averaged over contributions
    pub strength: f64,
    /// Computed weight in `[1, 10]`, set by the weight pass
    pub weight: f64,
    /// Chunks establishing the relationship
    pub chunk_ids: Vec<String>,
    /// Sum of the endpoint entities' degrees, set by the degree pass
    pub combined_degree: usize,
}

#[derive(Deserialize)]
struct ExtractedEntity {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct ExtractedRelationship {
    source: String,
    target: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    strength: f64,
}

#[derive(Serialize)]
struct EntityPromptView<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Default)]
struct GraphInner {
    /// Entities keyed by title; titles match exactly, case-sensitively
    entities: HashMap<String, Entity>,
    /// Relationships keyed by (source, target)
    relationships: HashMap<(String, String), Relationship>,
    chunk_graph: ChunkGraph,
}

struct RelationBatch {
    index: usize,
    chunks: Vec<Chunk>,
    entities: Vec<Entity>,
}

/// Builds one document's knowledge graph.
/// Scoped to a single ingestion; not shared across documents.
pub struct GraphBuilder {
    config: GraphConfig,
    chat_model: Arc<dyn ChatModel>,
    inner: RwLock<GraphInner>,
}

impl GraphBuilder {
    /// Create a builder for one document
    pub fn new(config: GraphConfig, chat_model: Arc<dyn ChatModel>) -> Self {
        Self {
            config,
            chat_model,
            inner: RwLock::new(GraphInner::default()),
        }
    }

    fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: Some(self.config.temperature),
            thinking: Some(false),
            ..ChatOptions::default()
        }
    }

    /// Build the graph from the document's ordered text chunks
    pub async fn build_graph(&self, chunks: &[Chunk]) -> Result<()> {
        info!(chunk_count = chunks.len(), "building knowledge graph");

        // Entity extraction: bounded concurrency, fail-fast on any error
        let extracted: Vec<(usize, Vec<Entity>)> = stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| async move {
                debug!(chunk_id = %chunk.id, index, "extracting entities");
                let entities = self.extract_entities(chunk).await?;
                Ok::<_, Error>((index, entities))
            })
            .buffer_unordered(self.config.entity_concurrency.max(1))
            .try_collect()
            .await?;

        let mut chunk_entities: Vec<Vec<Entity>> = vec![Vec::new(); chunks.len()];
        let mut total_entities = 0;
        for (index, entities) in extracted {
            total_entities += entities.len();
            chunk_entities[index] = entities;
        }
        info!(total_entities, "entity extraction complete");

        // Relationship extraction: bounded concurrency, best-effort
        let batches = self.relation_batches(chunks, &chunk_entities);
        stream::iter(batches)
            .map(|batch| async move {
                debug!(batch = batch.index, chunk_count = batch.chunks.len(), "extracting relationships");
                if let Err(err) = self
                    .extract_relationships(&batch.chunks, &batch.entities)
                    .await
                {
                    warn!(batch = batch.index, error = %err, "relationship extraction failed, skipping batch");
                }
            })
            .buffer_unordered(self.config.relation_concurrency.max(1))
            .collect::<Vec<()>>()
            .await;

        {
            let mut inner = self.inner.write();
            calculate_weights(&mut inner);
            calculate_degrees(&mut inner);
            build_chunk_graph(&mut inner);
            info!(
                entity_count = inner.entities.len(),
                relationship_count = inner.relationships.len(),
                chunk_graph_nodes = inner.chunk_graph.len(),
                "graph build complete"
            );
        }
        debug!(diagram = %self.mermaid_diagram(), "knowledge graph diagram");
        Ok(())
    }

    /// Group chunks into fixed-size batches with their merged entities;
    /// batches with too few entities are skipped
    fn relation_batches(&self, chunks: &[Chunk], chunk_entities: &[Vec<Entity>]) -> Vec<RelationBatch> {
        let batch_size = self.config.relation_batch_size.max(1);
        let mut batches = Vec::new();

        for (index, batch_chunks) in chunks.chunks(batch_size).enumerate() {
            let start = index * batch_size;
            let end = (start + batch_size).min(chunk_entities.len());

            // Merge the batch's entities, deduplicated by title
            let mut merged: Vec<Entity> = Vec::new();
            let mut seen = std::collections::HashSet::new();
            for entities in &chunk_entities[start..end] {
                for entity in entities {
                    if seen.insert(entity.title.clone()) {
                        merged.push(entity.clone());
                    }
                }
            }

            if merged.len() < MIN_ENTITIES_FOR_RELATION {
                debug!(batch = index, entity_count = merged.len(), "skipping batch, not enough entities");
                continue;
            }
            batches.push(RelationBatch {
                index,
                chunks: batch_chunks.to_vec(),
                entities: merged,
            });
        }
        batches
    }

    /// Extract entities from one chunk and fold them into the entity map.
    /// The model call happens outside the lock.
    async fn extract_entities(&self, chunk: &Chunk) -> Result<Vec<Entity>> {
        if chunk.content.is_empty() {
            warn!(chunk_id = %chunk.id, "empty chunk content, skipping entity extraction");
            return Ok(Vec::new());
        }

        let messages = [
            Message::system(&self.config.entity_prompt),
            Message::user(&chunk.content),
        ];
        let response = self
            .chat_model
            .chat(&messages, &self.chat_options())
            .await
            .map_err(|e| {
                Error::model_call(format!("entity extraction failed for chunk {}: {e}", chunk.id))
            })?;

        let extracted: Vec<ExtractedEntity> = parse_llm_json(&response.content)?;
        debug!(chunk_id = %chunk.id, count = extracted.len(), "entities extracted");

        let mut inner = self.inner.write();
        let mut involved = Vec::with_capacity(extracted.len());
        for entity in extracted {
            if entity.title.is_empty() || entity.description.is_empty() {
                warn!(title = %entity.title, "dropping entity with empty title or description");
                continue;
            }
            match inner.entities.get_mut(&entity.title) {
                Some(existing) => {
                    if !existing.chunk_ids.contains(&chunk.id) {
                        existing.chunk_ids.push(chunk.id.clone());
                    }
                    existing.frequency += 1;
                    involved.push(existing.clone());
                }
                None => {
                    let created = Entity {
                        id: Uuid::new_v4().to_string(),
                        title: entity.title.clone(),
                        description: entity.description,
                        frequency: 1,
                        chunk_ids: vec![chunk.id.clone()],
                        degree: 0,
                    };
                    inner.entities.insert(entity.title, created.clone());
                    involved.push(created);
                }
            }
        }
        Ok(involved)
    }

    /// Extract relationships for one batch and fold them into the
    /// relationship map. The model call happens outside the lock.
    async fn extract_relationships(&self, chunks: &[Chunk], entities: &[Entity]) -> Result<()> {
        if entities.len() < MIN_ENTITIES_FOR_RELATION {
            return Ok(());
        }

        let views: Vec<EntityPromptView<'_>> = entities
            .iter()
            .map(|e| EntityPromptView {
                title: &e.title,
                description: &e.description,
            })
            .collect();
        let entities_json = serde_json::to_string(&views)?;

        let content = merge_chunk_contents(chunks);
        if content.is_empty() {
            warn!("no content to extract relationships from");
            return Ok(());
        }

        let messages = [
            Message::system(&self.config.relationship_prompt),
            Message::user(format!("Entities: {entities_json}\n\nText: {content}")),
        ];
        let response = self
            .chat_model
            .chat(&messages, &self.chat_options())
            .await
            .map_err(|e| Error::model_call(format!("relationship extraction failed: {e}")))?;

        let extracted: Vec<ExtractedRelationship> = parse_llm_json(&response.content)?;
        debug!(count = extracted.len(), "relationships extracted");

        let mut inner = self.inner.write();
        let mut added = 0;
        let mut updated = 0;
        for relationship in extracted {
            let chunk_ids =
                relation_chunk_ids(&inner.entities, &relationship.source, &relationship.target);
            if chunk_ids.is_empty() {
                debug!(
                    source = %relationship.source,
                    target = %relationship.target,
                    "skipping relationship with no supporting chunks"
                );
                continue;
            }

            let key = (relationship.source.clone(), relationship.target.clone());
            match inner.relationships.get_mut(&key) {
                Some(existing) => {
                    for chunk_id in chunk_ids {
                        if !existing.chunk_ids.contains(&chunk_id) {
                            existing.chunk_ids.push(chunk_id);
                        }
                    }
                    // Running average weighted by contributing chunk count
                    let count = existing.chunk_ids.len() as f64;
                    if count > 0.0 {
                        existing.strength =
                            (existing.strength * count + relationship.strength) / (count + 1.0);
                    }
                    updated += 1;
                }
                None => {
                    inner.relationships.insert(
                        key,
                        Relationship {
                            id: Uuid::new_v4().to_string(),
                            source: relationship.source,
                            target: relationship.target,
                            description: relationship.description,
                            strength: relationship.strength,
                            weight: 0.0,
                            chunk_ids,
                            combined_degree: 0,
                        },
                    );
                    added += 1;
                }
            }
        }
        debug!(added, updated, "relationship extraction folded in");
        Ok(())
    }

    /// All entities currently in the graph
    pub fn all_entities(&self) -> Vec<Entity> {
        self.inner.read().entities.values().cloned().collect()
    }

    /// All relationships currently in the graph
    pub fn all_relationships(&self) -> Vec<Relationship> {
        self.inner.read().relationships.values().cloned().collect()
    }

    /// Chunks directly related to `chunk_id`, strongest first
    pub fn relation_chunks(&self, chunk_id: &str, top_k: usize) -> Vec<String> {
        self.inner.read().chunk_graph.relation_chunks(chunk_id, top_k)
    }

    /// Second-degree related chunks, excluding direct relations
    pub fn indirect_relation_chunks(&self, chunk_id: &str, top_k: usize) -> Vec<String> {
        self.inner
            .read()
            .chunk_graph
            .indirect_relation_chunks(chunk_id, top_k)
    }

    /// The built graph in the shape the graph store persists:
    /// one node per entity carrying its chunk ids, one relation per edge
    pub fn graph_data(&self) -> GraphData {
        let inner = self.inner.read();
        let nodes = inner
            .entities
            .values()
            .map(|entity| GraphNode {
                name: entity.title.clone(),
                attributes: vec![entity.description.clone()],
                chunks: entity.chunk_ids.clone(),
            })
            .collect();
        let relations = inner
            .relationships
            .values()
            .map(|relationship| GraphRelation {
                node1: relationship.source.clone(),
                node2: relationship.target.clone(),
                relation: relationship.description.clone(),
            })
            .collect();
        GraphData { nodes, relations }
    }

    /// Mermaid rendering of the current entity graph
    pub fn mermaid_diagram(&self) -> String {
        let inner = self.inner.read();
        crate::export::mermaid_diagram(
            &inner.entities.values().cloned().collect::<Vec<_>>(),
            &inner.relationships.values().cloned().collect::<Vec<_>>(),
        )
    }
}

/// Union of the chunk ids attached to the two endpoint entities
fn relation_chunk_ids(
    entities: &HashMap<String, Entity>,
    source: &str,
    target: &str,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for title in [source, target] {
        if let Some(entity) = entities.get(title) {
            for chunk_id in &entity.chunk_ids {
                if seen.insert(chunk_id.clone()) {
                    ids.push(chunk_id.clone());
                }
            }
        }
    }
    ids
}

/// Concatenate batch chunk contents, skipping span overlap between
/// consecutive chunks
fn merge_chunk_contents(chunks: &[Chunk]) -> String {
    let Some(first) = chunks.first() else {
        return String::new();
    };
    let mut content = first.content.clone();
    let mut prev = first;

    for chunk in &chunks[1..] {
        if prev.end_at > chunk.start_at {
            let overlap = prev.end_at - chunk.start_at;
            let runes: Vec<char> = chunk.content.chars().collect();
            if overlap < runes.len() {
                content.extend(&runes[overlap..]);
            }
        } else {
            content.push_str(&chunk.content);
        }
        prev = chunk;
    }
    content
}

/// PMI-based relationship weights: PMI and strength are normalized
/// against their own maxima and combined into a `[1, 10]` weight
fn calculate_weights(inner: &mut GraphInner) {
    let mut entity_frequency: HashMap<String, usize> = HashMap::new();
    let mut total_entity_occurrences = 0usize;
    for entity in inner.entities.values() {
        let frequency = entity.chunk_ids.len();
        entity_frequency.insert(entity.title.clone(), frequency);
        total_entity_occurrences += frequency;
    }

    let total_rel_occurrences: usize = inner
        .relationships
        .values()
        .map(|r| r.chunk_ids.len())
        .sum();

    if total_entity_occurrences == 0 || total_rel_occurrences == 0 {
        warn!("insufficient data for weight calculation");
        return;
    }

    let mut max_pmi = 0.0f64;
    let mut max_strength = MIN_WEIGHT_VALUE;
    let mut pmi_values: HashMap<(String, String), f64> = HashMap::new();

    for (key, relationship) in &inner.relationships {
        let source_freq = entity_frequency.get(&relationship.source).copied().unwrap_or(0);
        let target_freq = entity_frequency.get(&relationship.target).copied().unwrap_or(0);
        let rel_freq = relationship.chunk_ids.len();

        if source_freq > 0 && target_freq > 0 && rel_freq > 0 {
            let source_p = source_freq as f64 / total_entity_occurrences as f64;
            let target_p = target_freq as f64 / total_entity_occurrences as f64;
            let rel_p = rel_freq as f64 / total_rel_occurrences as f64;

            // PMI: log2(P(src,tgt) / (P(src) * P(tgt))), floored at zero
            let pmi = (rel_p / (source_p * target_p)).log2().max(0.0);
            pmi_values.insert(key.clone(), pmi);
            if pmi > max_pmi {
                max_pmi = pmi;
            }
        }
        if relationship.strength > max_strength {
            max_strength = relationship.strength;
        }
    }

    for (key, relationship) in inner.relationships.iter_mut() {
        let pmi = pmi_values.get(key).copied().unwrap_or(0.0);
        let normalized_pmi = if max_pmi > 0.0 { pmi / max_pmi } else { 0.0 };
        let normalized_strength = relationship.strength / max_strength;

        let combined = normalized_pmi * PMI_WEIGHT + normalized_strength * STRENGTH_WEIGHT;
        relationship.weight = (MIN_WEIGHT_VALUE + WEIGHT_SCALE_FACTOR * combined)
            .clamp(MIN_WEIGHT_VALUE, MAX_WEIGHT_VALUE);
    }
}

/// Entity degree = in-degree + out-degree over relationships by title;
/// relationship combined degree = sum of its endpoints' degrees
fn calculate_degrees(inner: &mut GraphInner) {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut out_degree: HashMap<String, usize> = HashMap::new();
    for relationship in inner.relationships.values() {
        *out_degree.entry(relationship.source.clone()).or_default() += 1;
        *in_degree.entry(relationship.target.clone()).or_default() += 1;
    }

    for entity in inner.entities.values_mut() {
        entity.degree = in_degree.get(&entity.title).copied().unwrap_or(0)
            + out_degree.get(&entity.title).copied().unwrap_or(0);
    }

    let entities = &inner.entities;
    for relationship in inner.relationships.values_mut() {
        if let (Some(source), Some(target)) = (
            entities.get(&relationship.source),
            entities.get(&relationship.target),
        ) {
            relationship.combined_degree = source.degree + target.degree;
        }
    }
}

/// Connect every chunk of each relationship's source entity with every
/// chunk of its target entity
fn build_chunk_graph(inner: &mut GraphInner) {
    let mut graph = ChunkGraph::new();
    for relationship in inner.relationships.values() {
        let (Some(source), Some(target)) = (
            inner.entities.get(&relationship.source),
            inner.entities.get(&relationship.target),
        ) else {
            warn!(
                source = %relationship.source,
                target = %relationship.target,
                "missing endpoint entity for relationship"
            );
            continue;
        };

        for source_chunk in &source.chunk_ids {
            for target_chunk in &target.chunk_ids {
                graph.connect(
                    source_chunk,
                    target_chunk,
                    ChunkRelation {
                        weight: relationship.weight,
                        degree: relationship.combined_degree,
                    },
                );
            }
        }
    }
    inner.chunk_graph = graph;
}
