//! Breadth-first discovery of the reference graph below one root document.
//!
//! ## Overview
//!
//! [`GraphDiscoverer`] walks outward from a root [`ResourceKey`], asking a [`LinkSource`] for
//! each document's direct links. The graph is not known in advance: it may contain shared
//! children, self-references and cycles, and some documents may fail to open.
//!
//! ## Queue and visited set
//!
//! A single FIFO queue holds `(key, name)` pairs not yet scanned. A global visited set keyed by
//! resource id is updated at enqueue time, so every resource id is scanned at most once no
//! matter how many parents reference it. Edges, on the other hand, are always recorded: a child
//! referenced by N parents gets N incoming edges in the [`AdjacencyMap`]. An edge always points
//! at the key first recorded for the child's resource id, so every adjacency key has a node even
//! when two references disagree on the collection.
//!
//! ## Failure handling
//!
//! A document that cannot be opened or scanned keeps its [`ResourceNode`] with
//! `discovery_error` set and is treated as a leaf. Documents reachable only through it are not
//! discovered. Discovery itself never fails.
//!
//! ```text
//! R ──► P ──► L
//! └───► Q ──┘
//! ```
//! Scanning order: R, P, Q, L. L is scanned once and has two incoming edges.

use serde::{Deserialize, Serialize};
use std::collections::{hash_map::Entry, HashMap, VecDeque};

use crate::{
    error::SyncTreeError,
    event::{report, send, Event, EventSender, ProgressEvent},
    host::RemoteHost,
    links::{read_direct_links, LinkDiagnostic, LinkReport},
    resource::{ResourceKey, ResourceNode},
};

pub const DEFAULT_ROOT_NAME: &str = "ROOT";

/// Parent → direct children, in the order the children were found in the parent.
///
/// Repeated children under one parent are kept as given. Serialized as a list of entries so the
/// composite keys survive formats that only allow string map keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AdjacencyEntry>", into = "Vec<AdjacencyEntry>")]
pub struct AdjacencyMap(HashMap<ResourceKey, Vec<ResourceKey>>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjacencyEntry {
    pub parent: ResourceKey,
    pub children: Vec<ResourceKey>,
}

impl AdjacencyMap {
    pub fn new() -> Self {
        AdjacencyMap::default()
    }

    pub fn push(&mut self, parent: &ResourceKey, child: ResourceKey) {
        self.0.entry(parent.clone()).or_default().push(child);
    }

    /// Direct children of `parent`; empty for leaves and unknown keys.
    pub fn children(&self, parent: &ResourceKey) -> &[ResourceKey] {
        self.0.get(parent).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every `(parent, child)` edge. Parent order is unspecified; child order per parent is
    /// discovery order.
    pub fn edges(&self) -> impl Iterator<Item = (&ResourceKey, &ResourceKey)> {
        self.0
            .iter()
            .flat_map(|(parent, children)| children.iter().map(move |c| (parent, c)))
    }

    pub fn edge_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    /// Number of edges pointing at `child`, across all parents.
    pub fn in_degree(&self, child: &ResourceKey) -> usize {
        self.edges().filter(|(_, c)| *c == child).count()
    }
}

impl From<Vec<AdjacencyEntry>> for AdjacencyMap {
    fn from(entries: Vec<AdjacencyEntry>) -> Self {
        AdjacencyMap(
            entries
                .into_iter()
                .map(|e| (e.parent, e.children))
                .collect(),
        )
    }
}

impl From<AdjacencyMap> for Vec<AdjacencyEntry> {
    fn from(map: AdjacencyMap) -> Self {
        let mut entries: Vec<AdjacencyEntry> = map
            .0
            .into_iter()
            .map(|(parent, children)| AdjacencyEntry { parent, children })
            .collect();
        entries.sort_by(|a, b| a.parent.cmp(&b.parent));
        entries
    }
}

/// Output of a discovery run: the adjacency structure plus one node per scanned document, in
/// scan (breadth-first) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredGraph {
    pub root: ResourceKey,
    pub adjacency: AdjacencyMap,
    pub nodes: Vec<ResourceNode>,
}

impl DiscoveredGraph {
    fn new(root: ResourceKey) -> Self {
        DiscoveredGraph {
            root,
            adjacency: AdjacencyMap::new(),
            nodes: Vec::new(),
        }
    }

    pub fn node(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| &n.key == key)
    }

    fn node_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceNode> {
        self.nodes.iter_mut().find(|n| &n.key == key)
    }

    /// Node name, or an abbreviated id for keys without a node.
    pub fn display_name(&self, key: &ResourceKey) -> String {
        self.node(key)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| key.short_id())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter().filter(|n| n.is_failed())
    }
}

/// How the discoverer obtains the direct links of a document it does not hold open.
pub trait LinkSource<H: RemoteHost> {
    /// `Err` means the document could not be opened or scanned at all.
    fn links_of(&self, host: &H, key: &ResourceKey) -> Result<LinkReport, SyncTreeError>;
}

/// Open every document detached and read-only, read its links, and close it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedOpen;

impl<H: RemoteHost> LinkSource<H> for DetachedOpen {
    fn links_of(&self, host: &H, key: &ResourceKey) -> Result<LinkReport, SyncTreeError> {
        let handle = host.open_read_only_fast(key)?;
        let report = read_direct_links(host, &handle);
        if let Err(e) = host.close_resource(handle, false) {
            tracing::debug!("[Discovery] Ignoring close failure for {}: {}", key, e);
        }
        Ok(report)
    }
}

/// Read links from documents the host session already has open, opening detached only for
/// the rest. Session-owned handles are left open.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFirst;

impl<H: RemoteHost> LinkSource<H> for SessionFirst {
    fn links_of(&self, host: &H, key: &ResourceKey) -> Result<LinkReport, SyncTreeError> {
        match host.find_open(key) {
            Some(handle) => {
                tracing::debug!("[Discovery] Reusing open session document {}", key);
                Ok(read_direct_links(host, &handle))
            }
            None => DetachedOpen.links_of(host, key),
        }
    }
}

/// Result of scanning a single document.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub key: ResourceKey,
    pub name: String,
    /// Number of links found, duplicates included.
    pub children: usize,
    /// Children seen for the first time in this run.
    pub enqueued: usize,
    pub diagnostics: Vec<LinkDiagnostic>,
    pub error: Option<String>,
}

pub struct GraphDiscoverer<'h, H: RemoteHost, S = DetachedOpen> {
    host: &'h H,
    source: S,
    root_handle: Option<&'h H::Handle>,
    tx: EventSender,
    queue: VecDeque<(ResourceKey, String)>,
    /// Resource id → key of the node held for it.
    visited: HashMap<String, ResourceKey>,
    graph: DiscoveredGraph,
}

impl<'h, H: RemoteHost> GraphDiscoverer<'h, H, DetachedOpen> {
    /// Create a discoverer seeded with the root document.
    ///
    /// # Arguments
    /// * `host` - The remote host documents are opened through
    /// * `root` - Key of the root document
    /// * `root_name` - Display name of the root document
    /// * `tx` - Optional channel for progress events
    pub fn new(
        host: &'h H,
        root: ResourceKey,
        root_name: impl Into<String>,
        tx: EventSender,
    ) -> Self {
        let mut queue = VecDeque::new();
        let mut visited = HashMap::new();
        visited.insert(root.resource_id.clone(), root.clone());
        queue.push_back((root.clone(), root_name.into()));

        GraphDiscoverer {
            host,
            source: DetachedOpen,
            root_handle: None,
            tx,
            queue,
            visited,
            graph: DiscoveredGraph::new(root),
        }
    }
}

impl<'h, H: RemoteHost, S: LinkSource<H>> GraphDiscoverer<'h, H, S> {
    /// Read the root's links from an already-open handle instead of opening it again. The
    /// handle stays open.
    pub fn with_root_handle(mut self, handle: &'h H::Handle) -> Self {
        self.root_handle = Some(handle);
        self
    }

    pub fn with_source<T: LinkSource<H>>(self, source: T) -> GraphDiscoverer<'h, H, T> {
        GraphDiscoverer {
            host: self.host,
            source,
            root_handle: self.root_handle,
            tx: self.tx,
            queue: self.queue,
            visited: self.visited,
            graph: self.graph,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The graph discovered so far.
    pub fn graph(&self) -> &DiscoveredGraph {
        &self.graph
    }

    /// Scan the next queued document. Returns `None` once the queue is empty.
    pub fn discover_next(&mut self) -> Option<ScanResult> {
        let (key, name) = self.queue.pop_front()?;
        self.graph.nodes.push(ResourceNode::new(key.clone(), &name));
        report(&self.tx, ProgressEvent::info(format!("Scanning: {name}")));

        let scanned = match self.root_handle {
            Some(handle) if key == self.graph.root => Ok(read_direct_links(self.host, handle)),
            _ => self.source.links_of(self.host, &key),
        };

        let mut result = ScanResult {
            key: key.clone(),
            name: name.clone(),
            children: 0,
            enqueued: 0,
            diagnostics: Vec::new(),
            error: None,
        };

        let links = match scanned {
            Ok(LinkReport { links, diagnostics }) => {
                for diagnostic in diagnostics.iter() {
                    report(
                        &self.tx,
                        ProgressEvent {
                            level: diagnostic.level(),
                            message: format!("  {diagnostic}"),
                        },
                    );
                }
                report(
                    &self.tx,
                    ProgressEvent::info(format!(
                        "  Found {} cloud link(s) in {}",
                        links.len(),
                        name
                    )),
                );
                result.diagnostics = diagnostics;
                links
            }
            Err(e) => {
                let message = e.message();
                if let Some(node) = self.graph.node_mut(&key) {
                    node.discovery_error = Some(message.clone());
                }
                report(
                    &self.tx,
                    ProgressEvent::error(format!("  Error scanning {name}: {message}")),
                );
                result.error = Some(message);
                Vec::new()
            }
        };

        result.children = links.len();
        for link in links {
            let child = link.key(&key.region);
            match self.visited.entry(child.resource_id.clone()) {
                Entry::Occupied(held) => {
                    if held.get().collection_id != child.collection_id {
                        tracing::debug!(
                            "[Discovery] {} references {} under collection {}; using {}",
                            name,
                            child.resource_id,
                            child.collection_id,
                            held.get()
                        );
                    }
                    self.graph.adjacency.push(&key, held.get().clone());
                }
                Entry::Vacant(slot) => {
                    slot.insert(child.clone());
                    self.graph.adjacency.push(&key, child.clone());
                    self.queue.push_back((child, link.name));
                    result.enqueued += 1;
                }
            }
        }

        tracing::debug!(
            "[Discovery] {} scanned: {} link(s), {} new, {} queued",
            name,
            result.children,
            result.enqueued,
            self.queue.len()
        );
        Some(result)
    }

    /// Scan until the queue is empty and hand over the graph.
    pub fn discover_all(mut self) -> DiscoveredGraph {
        while self.discover_next().is_some() {}
        tracing::info!(
            "[Discovery] Complete: {} document(s), {} reference(s), {} failed",
            self.graph.len(),
            self.graph.adjacency.edge_count(),
            self.graph.failed_nodes().count()
        );
        self.graph
    }
}

/// Discover the reference graph below `root` using detached opens.
///
/// Emits [`Event::DiscoveryFinished`] on `tx` when done, in addition to returning the graph.
pub fn discover<H: RemoteHost>(
    host: &H,
    root: ResourceKey,
    root_name: &str,
    root_handle: Option<&H::Handle>,
    tx: EventSender,
) -> DiscoveredGraph {
    let mut discoverer = GraphDiscoverer::new(host, root, root_name, tx.clone());
    if let Some(handle) = root_handle {
        discoverer = discoverer.with_root_handle(handle);
    }
    let graph = discoverer.discover_all();
    send(&tx, Event::DiscoveryFinished(Box::new(graph.clone())));
    graph
}

/// One row of the discovered-tree view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLine {
    pub depth: usize,
    pub key: ResourceKey,
    pub name: String,
}

/// Pre-order rendering of the graph from its root.
///
/// A child referenced by several parents appears once under each of them. Expansion stops at a
/// node already on the current path, so cyclic graphs render finitely.
pub fn format_tree(graph: &DiscoveredGraph) -> Vec<TreeLine> {
    let mut lines = Vec::new();
    let mut path = Vec::new();
    push_subtree(graph, &graph.root, 0, &mut path, &mut lines);
    lines
}

fn push_subtree(
    graph: &DiscoveredGraph,
    key: &ResourceKey,
    depth: usize,
    path: &mut Vec<ResourceKey>,
    lines: &mut Vec<TreeLine>,
) {
    lines.push(TreeLine {
        depth,
        key: key.clone(),
        name: graph.display_name(key),
    });
    if path.contains(key) {
        return;
    }
    path.push(key.clone());
    for child in graph.adjacency.children(key) {
        push_subtree(graph, child, depth + 1, path, lines);
    }
    path.pop();
}
