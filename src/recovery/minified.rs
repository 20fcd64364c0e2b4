//! Minified graph
//!
//! The part of the optimizer's data flow graph that survives compilation:
//! for each node the exit stream mentions, whether it is a constant.

use std::fmt;

use crate::tracked::TrackedReferences;
use crate::value::Value;

/// Optimizer node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinifiedNode {
    pub id: NodeId,
    pub constant: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinifiedGraph {
    nodes: Vec<MinifiedNode>,
    sorted: bool,
}

impl MinifiedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, node: MinifiedNode) {
        self.nodes.push(node);
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sort by id for binary search and release spare capacity
    pub fn prepare_and_shrink(&mut self) {
        self.nodes.sort_by_key(|n| n.id);
        self.nodes.shrink_to_fit();
        self.sorted = true;
    }

    /// Look up a node; linear before [`MinifiedGraph::prepare_and_shrink`]
    pub fn at(&self, id: NodeId) -> Option<&MinifiedNode> {
        if self.sorted {
            self.nodes
                .binary_search_by_key(&id, |n| n.id)
                .ok()
                .map(|i| &self.nodes[i])
        } else {
            self.nodes.iter().find(|n| n.id == id)
        }
    }

    pub fn constant(&self, id: NodeId) -> Option<Value> {
        self.at(id).and_then(|n| n.constant)
    }

    pub fn validate_references(&self, tracked: &TrackedReferences) {
        for node in &self.nodes {
            if let Some(value) = &node.constant {
                tracked.check_value(value);
            }
        }
    }
}
