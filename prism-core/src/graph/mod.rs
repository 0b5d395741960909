//! Dependency Graph
//!
//! This module keeps the graph of relationships between base collections and
//! the artifacts derived from them.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent base collections, derived views or computed artifacts
//! - Edges represent dependencies: if A reads from B, there is an edge from B to A
//!
//! The graph is indexed by node ID for O(1) lookups, and keeps both forward
//! (dependencies) and reverse (dependents) edges so it can be walked in
//! either direction.

mod dependency;
mod node;

pub use dependency::DependencyGraph;
pub use node::{Node, NodeId, NodeKind};
