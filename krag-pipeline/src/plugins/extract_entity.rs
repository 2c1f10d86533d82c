//! Query-time entity extraction
//!
//! Prompts the chat model with a few-shot Q/A template and parses the
//! fenced-JSON extraction into graph nodes, whose names feed the
//! graph-based entity search stage. Only active when graph search is
//! enabled; every failure is soft.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use krag_core::error::{Error, Result};
use krag_core::extract::parse_json_items;
use krag_core::message::{ChatOptions, Message};
use krag_core::provider::{ChatModel, GraphData, GraphNode, GraphRelation};

use crate::event::{EventType, Next, Plugin};
use crate::state::ChatState;

/// Extraction sampling temperature
const EXTRACT_TEMPERATURE: f64 = 0.3;
/// Token budget for the extraction response
const EXTRACT_MAX_TOKENS: u64 = 4096;

const ENTITY_KEY: &str = "entity";
const ENTITY_ATTRIBUTES_KEY: &str = "entity_attributes";
const RELATION_SOURCE_KEY: &str = "entity1";
const RELATION_TARGET_KEY: &str = "entity2";
const RELATION_KEY: &str = "relation";

/// One worked example shown to the model
#[derive(Debug, Clone)]
pub struct ExtractionExample {
    /// Example input text
    pub text: String,
    /// Entities the example extracts
    pub nodes: Vec<GraphNode>,
    /// Relations the example extracts
    pub relations: Vec<GraphRelation>,
}

/// The few-shot prompt template for entity extraction
#[derive(Debug, Clone)]
pub struct ExtractionTemplate {
    /// Task description placed at the top of the system prompt
    pub description: String,
    /// Worked examples rendered as Q/A pairs
    pub examples: Vec<ExtractionExample>,
}

impl Default for ExtractionTemplate {
    fn default() -> Self {
        Self {
            description: "Extract the entities mentioned in the question, and any \
relationships between them. Answer with a fenced JSON list: one object per entity \
({\"entity\": name}) and one object per relationship ({\"entity1\": source, \
\"entity2\": target, \"relation\": label})."
                .to_string(),
            examples: vec![ExtractionExample {
                text: "Who founded Acme Corp and where is it headquartered?".to_string(),
                nodes: vec![
                    GraphNode {
                        name: "Acme Corp".into(),
                        ..GraphNode::default()
                    },
                ],
                relations: Vec::new(),
            }],
        }
    }
}

impl ExtractionTemplate {
    fn system_prompt(&self) -> String {
        let mut lines = vec![self.description.clone()];
        if !self.examples.is_empty() {
            lines.push("# Examples".to_string());
            for example in &self.examples {
                lines.push(format!("Q: {}", example.text.trim()));
                lines.push(format!("A: {}", format_extraction(&example.nodes, &example.relations)));
                lines.push(String::new());
            }
        }
        lines.join("\n")
    }

    fn user_prompt(&self, question: &str) -> String {
        format!("# Question\nQ: {question}\nA: ")
    }
}

/// Render an example answer the same way the model is asked to answer
fn format_extraction(nodes: &[GraphNode], relations: &[GraphRelation]) -> String {
    let mut items: Vec<Value> = Vec::new();
    for node in nodes {
        let mut item = json!({ ENTITY_KEY: node.name });
        if !node.attributes.is_empty() {
            item[ENTITY_ATTRIBUTES_KEY] = json!(node.attributes);
        }
        items.push(item);
    }
    for relation in relations {
        items.push(json!({
            RELATION_SOURCE_KEY: relation.node1,
            RELATION_TARGET_KEY: relation.node2,
            RELATION_KEY: relation.relation,
        }));
    }
    let body = serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string());
    format!("```json\n{body}\n```")
}

/// Parse a model extraction response into graph data
pub(crate) fn parse_graph(text: &str) -> Result<GraphData> {
    let items = parse_json_items(text)?;

    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut relations: Vec<GraphRelation> = Vec::new();

    for item in items {
        if let Some(name) = item.get(ENTITY_KEY) {
            let attributes = item
                .get(ENTITY_ATTRIBUTES_KEY)
                .and_then(Value::as_array)
                .map(|attrs| attrs.iter().map(value_to_string).collect())
                .unwrap_or_default();
            nodes.push(GraphNode {
                name: value_to_string(name),
                attributes,
                chunks: Vec::new(),
            });
        } else if item.contains_key(RELATION_SOURCE_KEY) && item.contains_key(RELATION_TARGET_KEY) {
            relations.push(GraphRelation {
                node1: item.get(RELATION_SOURCE_KEY).map(value_to_string).unwrap_or_default(),
                node2: item.get(RELATION_TARGET_KEY).map(value_to_string).unwrap_or_default(),
                relation: item.get(RELATION_KEY).map(value_to_string).unwrap_or_default(),
            });
        } else {
            warn!(?item, "unsupported extraction row, skipping");
        }
    }

    Ok(rebuild_graph(nodes, relations))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deduplicate nodes by name (merging attributes), drop self-relations,
/// and materialize nodes for relation endpoints the model never listed.
fn rebuild_graph(nodes: Vec<GraphNode>, relations: Vec<GraphRelation>) -> GraphData {
    let mut ordered: Vec<GraphNode> = Vec::new();
    let mut index_by_name: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();

    for node in nodes {
        match index_by_name.get(&node.name) {
            Some(&i) => ordered[i].attributes.extend(node.attributes),
            None => {
                index_by_name.insert(node.name.clone(), ordered.len());
                ordered.push(node);
            }
        }
    }

    let mut kept_relations = Vec::new();
    for relation in relations {
        if relation.node1 == relation.node2 {
            debug!(node = %relation.node1, "dropping self-relation");
            continue;
        }
        for endpoint in [&relation.node1, &relation.node2] {
            if !index_by_name.contains_key(endpoint) {
                index_by_name.insert(endpoint.clone(), ordered.len());
                ordered.push(GraphNode {
                    name: endpoint.clone(),
                    ..GraphNode::default()
                });
            }
        }
        kept_relations.push(relation);
    }

    GraphData {
        nodes: ordered,
        relations: kept_relations,
    }
}

/// Extracts entity names from the query for graph search
pub struct EntityExtractor {
    chat_model: Arc<dyn ChatModel>,
    template: ExtractionTemplate,
    graph_enabled: bool,
}

impl EntityExtractor {
    /// Create the extractor; `graph_enabled` mirrors the conversation config
    pub fn new(chat_model: Arc<dyn ChatModel>, graph_enabled: bool) -> Self {
        Self {
            chat_model,
            template: ExtractionTemplate::default(),
            graph_enabled,
        }
    }

    /// Override the few-shot template
    pub fn with_template(mut self, template: ExtractionTemplate) -> Self {
        self.template = template;
        self
    }

    async fn extract(&self, question: &str) -> Result<GraphData> {
        let messages = [
            Message::system(self.template.system_prompt()),
            Message::user(self.template.user_prompt(question)),
        ];
        let options = ChatOptions {
            temperature: Some(EXTRACT_TEMPERATURE),
            max_tokens: Some(EXTRACT_MAX_TOKENS),
            thinking: Some(false),
            ..ChatOptions::default()
        };

        let response = self
            .chat_model
            .chat(&messages, &options)
            .await
            .map_err(|e| Error::model_call(e.to_string()))?;
        parse_graph(&response.content)
    }
}

#[async_trait]
impl Plugin for EntityExtractor {
    fn activation_events(&self) -> Vec<EventType> {
        vec![EventType::RewriteQuery]
    }

    async fn on_event(
        &self,
        event: EventType,
        state: &mut ChatState,
        next: Next<'_>,
    ) -> Result<()> {
        if !self.graph_enabled {
            debug!("graph search disabled, skipping entity extraction");
            return next.run(event, state).await;
        }

        match self.extract(&state.query).await {
            Ok(graph) => {
                let names: Vec<String> = graph.nodes.iter().map(|n| n.name.clone()).collect();
                debug!(entities = ?names, "extracted entities");
                state.entities = names;
            }
            Err(err) => {
                warn!(error = %err, session_id = %state.session_id, "entity extraction failed");
            }
        }
        next.run(event, state).await
    }
}
