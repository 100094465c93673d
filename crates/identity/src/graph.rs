//! Identity graph and connected-component extraction.
//!
//! Identifier strings are interned once into a dense petgraph arena;
//! edge insertion and traversal work purely on integer node indices.

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{NodeIndex, UnGraph};

/// Undirected graph over distinct identifier strings.
#[derive(Default)]
pub struct IdentityGraph {
    graph: UnGraph<(), ()>,
    identifiers: Vec<String>,
    index_of: HashMap<String, NodeIndex>,
}

impl IdentityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `identifier`, creating it on first sight.
    pub fn intern(&mut self, identifier: &str) -> NodeIndex {
        if let Some(&index) = self.index_of.get(identifier) {
            return index;
        }
        let index = self.graph.add_node(());
        debug_assert_eq!(index.index(), self.identifiers.len());
        self.identifiers.push(identifier.to_string());
        self.index_of.insert(identifier.to_string(), index);
        index
    }

    pub fn get(&self, identifier: &str) -> Option<NodeIndex> {
        self.index_of.get(identifier).copied()
    }

    /// Add an undirected edge; self-loops and duplicates are ignored.
    pub fn connect(&mut self, a: NodeIndex, b: NodeIndex) {
        if a != b && self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Interned identifiers in insertion order; positions equal node
    /// indices.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Connected components via breadth-first traversal.
    ///
    /// Each component's members come back sorted; components are ordered
    /// by descending size, then by their sorted member lists, so output
    /// is reproducible for identical inputs.
    pub fn components(&self) -> Vec<Vec<String>> {
        let mut visited = vec![false; self.graph.node_count()];
        let mut components: Vec<Vec<String>> = Vec::new();
        for start in self.graph.node_indices() {
            if visited[start.index()] {
                continue;
            }
            visited[start.index()] = true;
            let mut queue = VecDeque::from([start]);
            let mut members = Vec::new();
            while let Some(node) = queue.pop_front() {
                members.push(self.identifiers[node.index()].clone());
                for neighbor in self.graph.neighbors(node) {
                    if !visited[neighbor.index()] {
                        visited[neighbor.index()] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
            members.sort();
            components.push(members);
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }
}
