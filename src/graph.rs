//! Resource dependency graph.
//!
//! Nodes are resources keyed by logical id; an edge `a -> b` means `b`
//! depends on `a` (`a` must exist before `b` is created and must outlive it).
//! Edges come from explicit `DependsOn` entries and from `Ref`/`Fn::GetAtt`
//! references inside resource properties.
//!
//! Orderings are deterministic: ties between independent resources are broken
//! by declaration order, so the same template always plans the same way.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};
use crate::state::StackState;
use crate::template::{collect_references, Template};

/// A node in the resource graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Logical id
    pub logical_id: String,
    /// Resource type
    pub resource_type: String,
}

/// Dependency graph over the resources of a template or a deployed stack.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<ResourceNode, ()>,
    node_indices: HashMap<String, NodeIndex>,
}

impl ResourceGraph {
    /// Build the graph for a template.
    ///
    /// Fails on references to unknown logical ids (from resources or outputs)
    /// and on dependency cycles.
    pub fn from_template(template: &Template) -> Result<Self> {
        let graph = Self::build(
            template.resources.iter().map(|(id, r)| {
                (id.as_str(), r.resource_type.as_str(), r.dependencies())
            }),
            true,
        )?;

        for (name, output) in &template.outputs {
            for reference in collect_references(&output.value) {
                if !graph.contains(reference.target()) {
                    return Err(Error::UnknownReference {
                        from: name.clone(),
                        target: reference.target().to_string(),
                    });
                }
            }
        }

        Ok(graph)
    }

    /// Build the graph for deployed state.
    ///
    /// Dependencies on resources that are no longer recorded are ignored.
    pub fn from_state(state: &StackState) -> Result<Self> {
        Self::build(
            state.resources.iter().map(|(id, r)| {
                (id.as_str(), r.resource_type.as_str(), r.depends_on.clone())
            }),
            false,
        )
    }

    fn build<'a>(
        nodes: impl Iterator<Item = (&'a str, &'a str, Vec<String>)>,
        strict: bool,
    ) -> Result<Self> {
        let mut this = Self::default();
        let mut pending = Vec::new();

        for (logical_id, resource_type, deps) in nodes {
            let idx = this.graph.add_node(ResourceNode {
                logical_id: logical_id.to_string(),
                resource_type: resource_type.to_string(),
            });
            this.node_indices.insert(logical_id.to_string(), idx);
            pending.push((idx, logical_id, deps));
        }

        for (idx, logical_id, deps) in pending {
            for dep in deps {
                match this.node_indices.get(&dep) {
                    Some(&from) => {
                        this.graph.update_edge(from, idx, ());
                    }
                    None if strict => {
                        return Err(Error::UnknownReference {
                            from: logical_id.to_string(),
                            target: dep,
                        })
                    }
                    None => {}
                }
            }
        }

        let cycles = this.cycles();
        if let Some(cycle) = cycles.into_iter().next() {
            return Err(Error::DependencyCycle(cycle));
        }

        Ok(this)
    }

    /// Strongly connected components that form cycles, members sorted.
    fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| {
                let mut ids: Vec<String> = scc
                    .into_iter()
                    .map(|idx| self.graph[idx].logical_id.clone())
                    .collect();
                ids.sort();
                ids
            })
            .collect()
    }

    /// Whether a logical id is in the graph.
    pub fn contains(&self, logical_id: &str) -> bool {
        self.node_indices.contains_key(logical_id)
    }

    /// Look up a node.
    pub fn node(&self, logical_id: &str) -> Option<&ResourceNode> {
        self.node_indices
            .get(logical_id)
            .map(|idx| &self.graph[*idx])
    }

    /// Number of resources.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Groups of resources that can be created concurrently.
    ///
    /// Every resource in level `n` depends only on resources in levels `< n`.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut current: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut levels = Vec::new();

        while !current.is_empty() {
            current.sort();
            let mut next = Vec::new();
            for &idx in &current {
                for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    in_degree[dependent.index()] -= 1;
                    if in_degree[dependent.index()] == 0 {
                        next.push(dependent);
                    }
                }
            }
            levels.push(
                current
                    .iter()
                    .map(|idx| self.graph[*idx].logical_id.clone())
                    .collect(),
            );
            current = next;
        }

        levels
    }

    /// Topological order: dependencies before dependents.
    pub fn creation_order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }

    /// Reverse topological order: dependents before dependencies.
    pub fn deletion_order(&self) -> Vec<String> {
        let mut order = self.creation_order();
        order.reverse();
        order
    }

    /// Resources `logical_id` depends on, directly only.
    pub fn direct_dependencies(&self, logical_id: &str) -> Vec<String> {
        self.neighbors(logical_id, Direction::Incoming, false)
    }

    /// Resources `logical_id` depends on, directly or transitively.
    pub fn dependencies(&self, logical_id: &str) -> Vec<String> {
        self.neighbors(logical_id, Direction::Incoming, true)
    }

    /// Resources that depend on `logical_id`, directly or transitively.
    pub fn dependents(&self, logical_id: &str) -> Vec<String> {
        self.neighbors(logical_id, Direction::Outgoing, true)
    }

    fn neighbors(&self, logical_id: &str, direction: Direction, transitive: bool) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&start) = self.node_indices.get(logical_id) {
            queue.push_back(start);
            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if seen.insert(neighbor) && transitive {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        let mut found: Vec<NodeIndex> = seen.into_iter().collect();
        found.sort();
        found
            .into_iter()
            .map(|idx| self.graph[idx].logical_id.clone())
            .collect()
    }

    /// Render the graph in Graphviz DOT format.
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph stack {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}\"];\n",
                node.logical_id, node.logical_id, node.resource_type
            ));
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            output.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.graph[edge.source()].logical_id,
                self.graph[edge.target()].logical_id
            ));
        }

        output.push_str("}\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{get_att, reference, TemplateResource};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template(resources: Vec<(&str, serde_json::Value, Vec<&str>)>) -> Template {
        let mut template = Template::default();
        for (id, props, deps) in resources {
            let mut resource = TemplateResource::new("Test::Resource", props);
            for dep in deps {
                resource = resource.depends_on(dep);
            }
            template.resources.insert(id.to_string(), resource);
        }
        template
    }

    fn diamond() -> Template {
        template(vec![
            ("Vpc", json!({}), vec![]),
            ("SubnetA", json!({ "VpcId": reference("Vpc") }), vec![]),
            ("SubnetB", json!({ "VpcId": reference("Vpc") }), vec![]),
            (
                "Service",
                json!({ "Subnets": [reference("SubnetA"), get_att("SubnetB", "Id")] }),
                vec![],
            ),
        ])
    }

    #[test]
    fn test_creation_and_deletion_order() {
        let graph = ResourceGraph::from_template(&diamond()).unwrap();
        assert_eq!(
            graph.creation_order(),
            vec!["Vpc", "SubnetA", "SubnetB", "Service"]
        );
        assert_eq!(
            graph.deletion_order(),
            vec!["Service", "SubnetB", "SubnetA", "Vpc"]
        );
    }

    #[test]
    fn test_levels() {
        let graph = ResourceGraph::from_template(&diamond()).unwrap();
        assert_eq!(
            graph.levels(),
            vec![
                vec!["Vpc".to_string()],
                vec!["SubnetA".to_string(), "SubnetB".to_string()],
                vec!["Service".to_string()],
            ]
        );
    }

    #[test]
    fn test_transitive_queries() {
        let graph = ResourceGraph::from_template(&diamond()).unwrap();
        assert_eq!(graph.dependents("Vpc"), vec!["SubnetA", "SubnetB", "Service"]);
        assert_eq!(graph.dependencies("Service"), vec!["Vpc", "SubnetA", "SubnetB"]);
        assert_eq!(graph.direct_dependencies("Service"), vec!["SubnetA", "SubnetB"]);
        assert!(graph.dependents("Service").is_empty());
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_unknown_reference() {
        let t = template(vec![("A", json!({ "X": reference("Ghost") }), vec![])]);
        let err = ResourceGraph::from_template(&t).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownReference { ref from, ref target } if from == "A" && target == "Ghost"
        ));
    }

    #[test]
    fn test_cycle_detection() {
        let t = template(vec![("A", json!({}), vec!["B"]), ("B", json!({}), vec!["A"])]);
        let err = ResourceGraph::from_template(&t).unwrap_err();
        match err {
            Error::DependencyCycle(members) => assert_eq!(members, vec!["A", "B"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let t = template(vec![("A", json!({ "Me": reference("A") }), vec![])]);
        assert!(matches!(
            ResourceGraph::from_template(&t),
            Err(Error::DependencyCycle(_))
        ));
    }

    #[test]
    fn test_dot_output() {
        let graph = ResourceGraph::from_template(&diamond()).unwrap();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph stack {"));
        assert!(dot.contains("\"Vpc\" -> \"SubnetA\";"));
        assert!(dot.contains("Test::Resource"));
    }
}
