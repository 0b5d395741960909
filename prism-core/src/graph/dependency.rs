//! Dependency Graph
//!
//! Keeps the artifact DAG: which derived and computed artifacts read from
//! which sources. Propagation itself is driven by subscriptions, depth-first
//! and synchronous, so the graph is not consulted on the hot path. It exists
//! to reject cycles at bind time and to answer "what does a change here
//! reach, and in which order" for teardown and introspection.
//!
//! # Algorithm
//!
//! - Binding `dependent` to `dependency` is rejected if `dependent` already
//!   reaches `dependency`, or if they are the same node.
//! - [`DependencyGraph::propagation_order`] collects every node reachable
//!   from a source (BFS) and sorts them topologically with Kahn's algorithm,
//!   counting only edges inside that set.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{Node, NodeId, NodeKind};
use crate::error::{Error, Result};

/// The artifact dependency DAG.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// All nodes in the graph, indexed by ID, in insertion order.
    nodes: IndexMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, kind: NodeKind, name: impl Into<String>) -> NodeId {
        let node = Node::new(kind, name);
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&node_id)?;

        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }
        Some(node)
    }

    /// Get a reference to a node.
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Add a dependency edge: `dependent` reads from `dependency`.
    ///
    /// Fails with [`Error::DependencyCycle`] if the edge would close a cycle,
    /// and with [`Error::UnknownSource`] if either node is missing.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> Result<()> {
        let upstream = self.name_of(dependency)?;
        let downstream = self.name_of(dependent)?;

        if dependency == dependent || self.reaches(dependent, dependency) {
            return Err(Error::DependencyCycle {
                dependent: downstream,
                upstream,
            });
        }

        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
        Ok(())
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Check whether `to` is reachable from `from` along dependent edges.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);

        while let Some(node_id) = queue.pop_front() {
            if node_id == to {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.dependents().iter().copied());
            }
        }
        false
    }

    /// Every node a change of `source` reaches, dependencies before
    /// dependents. `source` itself is not included.
    pub fn propagation_order(&self, source: NodeId) -> Vec<NodeId> {
        let mut reached = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(node) = self.nodes.get(&source) {
            queue.extend(node.dependents().iter().copied());
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                reached.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        self.topological_sort(reached)
    }

    /// All nodes, dependencies before dependents.
    pub fn topological_order(&self) -> Vec<NodeId> {
        self.topological_sort(self.nodes.keys().copied().collect())
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that dependencies come before dependents.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the node set)
        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn name_of(&self, node_id: NodeId) -> Result<String> {
        self.nodes
            .get(&node_id)
            .map(|n| n.name().to_string())
            .ok_or_else(|| Error::UnknownSource(format!("node {}", node_id.raw())))
    }
}
