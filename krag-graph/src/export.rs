//! Mermaid export of the entity graph
//!
//! Renders entities and relationships as a Mermaid diagram for
//! inspection: connected components become subgraphs, isolated entities
//! are skipped, strong relationships get a heavier link style and
//! frequent entities a highlighted class.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::builder::{Entity, Relationship};

/// Relationships above this strength use the heavy link style
const STRONG_LINK_STRENGTH: f64 = 7.0;
/// Entities above this frequency use the highlighted node class
const HIGH_FREQUENCY: usize = 5;

/// Render the entity graph as a Mermaid `graph TD` diagram
pub fn mermaid_diagram(entities: &[Entity], relationships: &[Relationship]) -> String {
    let mut entities: Vec<&Entity> = entities.iter().collect();
    entities.sort_by(|a, b| b.frequency.cmp(&a.frequency).then(a.title.cmp(&b.title)));
    let mut relationships: Vec<&Relationship> = relationships.iter().collect();
    relationships.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let node_ids: HashMap<&str, String> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.title.as_str(), format!("E{i}")))
        .collect();

    // Undirected adjacency for component discovery
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for relationship in &relationships {
        if node_ids.contains_key(relationship.source.as_str())
            && node_ids.contains_key(relationship.target.as_str())
        {
            adjacency
                .entry(relationship.source.as_str())
                .or_default()
                .push(relationship.target.as_str());
            adjacency
                .entry(relationship.target.as_str())
                .or_default()
                .push(relationship.source.as_str());
        }
    }

    let mut out = String::new();
    out.push_str("```mermaid\ngraph TD\n");
    out.push_str("  classDef entity fill:#f9f,stroke:#333,stroke-width:1px;\n");
    out.push_str("  classDef highFreq fill:#bbf,stroke:#333,stroke-width:2px;\n");

    let mut visited: HashSet<&str> = HashSet::new();
    let mut subgraph_count = 0;

    for entity in &entities {
        if visited.contains(entity.title.as_str()) {
            continue;
        }
        let component = collect_component(entity.title.as_str(), &adjacency, &mut visited);

        // Isolated entities add noise, leave them out
        if component.len() < 2 {
            continue;
        }
        subgraph_count += 1;

        let _ = writeln!(out, "\n  subgraph S{subgraph_count}");
        let members: HashSet<&str> = component.iter().copied().collect();
        for title in &component {
            if let Some(node_id) = node_ids.get(title) {
                let _ = writeln!(out, "    {node_id}[\"{title}\"]");
            }
        }
        for relationship in &relationships {
            if members.contains(relationship.source.as_str())
                && members.contains(relationship.target.as_str())
            {
                let (Some(source_id), Some(target_id)) = (
                    node_ids.get(relationship.source.as_str()),
                    node_ids.get(relationship.target.as_str()),
                ) else {
                    continue;
                };
                let link = if relationship.strength > STRONG_LINK_STRENGTH {
                    "==>"
                } else {
                    "-->"
                };
                let _ = writeln!(
                    out,
                    "    {source_id} {link}|{}| {target_id}",
                    relationship.description
                );
            }
        }
        out.push_str("  end\n");

        for title in &component {
            let Some(node_id) = node_ids.get(title) else {
                continue;
            };
            let class = entities
                .iter()
                .find(|e| e.title == *title)
                .filter(|e| e.frequency > HIGH_FREQUENCY)
                .map_or("entity", |_| "highFreq");
            let _ = writeln!(out, "  class {node_id} {class};");
        }
    }

    out.push_str("```\n");
    out
}

/// Depth-first traversal of one connected component
fn collect_component<'a>(
    start: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
) -> Vec<&'a str> {
    let mut component = Vec::new();
    let mut stack = vec![start];
    while let Some(title) = stack.pop() {
        if !visited.insert(title) {
            continue;
        }
        component.push(title);
        if let Some(neighbours) = adjacency.get(title) {
            for neighbour in neighbours {
                if !visited.contains(neighbour) {
                    stack.push(neighbour);
                }
            }
        }
    }
    component
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(title: &str, frequency: usize) -> Entity {
        Entity {
            id: format!("id-{title}"),
            title: title.into(),
            description: String::new(),
            frequency,
            chunk_ids: Vec::new(),
            degree: 0,
        }
    }

    fn relationship(source: &str, target: &str, strength: f64) -> Relationship {
        Relationship {
            id: format!("rel-{source}-{target}"),
            source: source.into(),
            target: target.into(),
            description: "relates to".into(),
            strength,
            weight: strength,
            chunk_ids: Vec::new(),
            combined_degree: 0,
        }
    }

    #[test]
    fn connected_entities_form_a_subgraph() {
        let diagram = mermaid_diagram(
            &[entity("A", 1), entity("B", 2)],
            &[relationship("A", "B", 5.0)],
        );

        assert!(diagram.contains("subgraph S1"));
        assert!(diagram.contains("[\"A\"]"));
        assert!(diagram.contains("[\"B\"]"));
        assert!(diagram.contains("-->|relates to|"));
    }

    #[test]
    fn isolated_entities_are_omitted() {
        let diagram = mermaid_diagram(
            &[entity("A", 1), entity("B", 1), entity("Lonely", 9)],
            &[relationship("A", "B", 5.0)],
        );

        assert!(!diagram.contains("Lonely"));
    }

    #[test]
    fn strong_relationships_use_heavy_links() {
        let diagram = mermaid_diagram(
            &[entity("A", 1), entity("B", 1)],
            &[relationship("A", "B", 9.0)],
        );

        assert!(diagram.contains("==>"));
    }

    #[test]
    fn frequent_entities_get_the_highlight_class() {
        let diagram = mermaid_diagram(
            &[entity("A", 6), entity("B", 1)],
            &[relationship("A", "B", 3.0)],
        );

        assert!(diagram.contains("class E0 highFreq;"));
        assert!(diagram.contains("class E1 entity;"));
    }
}
