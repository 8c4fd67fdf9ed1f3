//! Leaf-first ordering of discovered documents.
//!
//! [`sync_order`] is a depth-first post-order traversal started from every discovered node in
//! discovery order, sharing one visited set across all starts. Children are emitted before
//! their parents, so publishing in this order never publishes a document before something it
//! references.
//!
//! Cycles are broken silently: an edge back to a node already entered is not followed again.
//! The resulting order follows the first-encountered dependency direction. Use
//! [`SyncOrder::cycles`] to find out whether that happened.

use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::{
    discovery::AdjacencyMap,
    resource::{ResourceKey, ResourceNode},
};

/// Every discovered key exactly once, dependencies first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOrder(Vec<ResourceKey>);

impl SyncOrder {
    pub fn keys(&self) -> &[ResourceKey] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKey> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, key: &ResourceKey) -> Option<usize> {
        self.0.iter().position(|k| k == key)
    }

    /// Edges whose child is not ordered before its parent. Empty for acyclic graphs; for
    /// cyclic graphs these are the back-edges the planner dropped. Self-edges are ignored.
    pub fn violations<'a>(
        &self,
        adjacency: &'a AdjacencyMap,
    ) -> Vec<(&'a ResourceKey, &'a ResourceKey)> {
        let positions: HashMap<&ResourceKey, usize> =
            self.0.iter().enumerate().map(|(i, k)| (k, i)).collect();
        adjacency
            .edges()
            .filter(|(parent, child)| parent != child)
            .filter(|(parent, child)| match (positions.get(child), positions.get(parent)) {
                (Some(c), Some(p)) => c > p,
                _ => false,
            })
            .collect()
    }

    /// Reference cycles in `adjacency`: strongly connected components with more than one
    /// member, and documents referencing themselves.
    pub fn cycles(&self, adjacency: &AdjacencyMap) -> Vec<Vec<ResourceKey>> {
        let mut index: HashMap<&ResourceKey, usize> = HashMap::new();
        let mut keys: Vec<&ResourceKey> = Vec::new();
        let mut graph = DiGraphMap::<usize, ()>::new();
        for (parent, child) in adjacency.edges() {
            let p = *index.entry(parent).or_insert_with(|| {
                keys.push(parent);
                keys.len() - 1
            });
            let c = *index.entry(child).or_insert_with(|| {
                keys.push(child);
                keys.len() - 1
            });
            graph.add_edge(p, c, ());
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| scc.into_iter().map(|i| keys[i].clone()).collect())
            .collect()
    }
}

impl IntoIterator for SyncOrder {
    type Item = ResourceKey;
    type IntoIter = std::vec::IntoIter<ResourceKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<ResourceKey>> for SyncOrder {
    fn from(keys: Vec<ResourceKey>) -> Self {
        SyncOrder(keys)
    }
}

/// Order `nodes` so that every node comes after everything it references.
///
/// Never fails and always returns each node key exactly once. Keys that appear only as
/// adjacency children (never scanned) are included where they are first reached.
pub fn sync_order(adjacency: &AdjacencyMap, nodes: &[ResourceNode]) -> SyncOrder {
    let mut visited: HashSet<ResourceKey> = HashSet::new();
    let mut order = Vec::with_capacity(nodes.len());
    // (node, index of the next child to visit)
    let mut stack: Vec<(ResourceKey, usize)> = Vec::new();

    for start in nodes.iter().map(|n| &n.key) {
        if !visited.insert(start.clone()) {
            continue;
        }
        stack.push((start.clone(), 0));

        while let Some(top) = stack.last_mut() {
            let children = adjacency.children(&top.0);
            if top.1 < children.len() {
                let child = &children[top.1];
                top.1 += 1;
                if visited.insert(child.clone()) {
                    stack.push((child.clone(), 0));
                }
            } else if let Some((done, _)) = stack.pop() {
                order.push(done);
            }
        }
    }

    tracing::debug!("[Plan] Sync order over {} document(s)", order.len());
    SyncOrder(order)
}
