//! Build dependency graph
//!
//! Models source/header/object/output relationships as a directed acyclic
//! graph. An edge `from -> to` means `from` needs `to` to exist and be current
//! before it can be produced.
//!
//! Acyclicity is enforced when an edge is inserted, so the executor can never
//! be handed a plan that deadlocks. All traversals use an explicit stack so
//! very deep header chains cannot overflow the call stack.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use crate::error::GraphError;

/// Kind of artifact a node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Translation unit
    Source,
    /// Included header
    Header,
    /// Compiled object file
    Object,
    /// Static or shared library
    Library,
    /// Linked executable
    Executable,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Header => write!(f, "header"),
            Self::Object => write!(f, "object"),
            Self::Library => write!(f, "library"),
            Self::Executable => write!(f, "executable"),
        }
    }
}

/// One artifact in the build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique identifier (the artifact path as a string)
    pub id: String,
    /// Artifact kind
    pub kind: NodeKind,
    /// Filesystem path
    pub path: PathBuf,
    /// Content hash, if known
    pub hash: Option<String>,
    /// Hash of the command line that last produced it
    pub command_hash: Option<String>,
    /// Ids of the nodes this one depends on, in insertion order
    dependencies: Vec<String>,
}

impl Node {
    /// Create a node keyed by its path
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().into_owned(),
            kind,
            path,
            hash: None,
            command_hash: None,
            dependencies: Vec::new(),
        }
    }

    /// Ids of direct dependencies
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Directed acyclic graph of build artifacts
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<String, Node>,
    /// Node ids in insertion order, for deterministic traversal
    order: Vec<String>,
    entry_points: Vec<String>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of edges
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies.len()).sum()
    }

    /// Insert a node. Fails with [`GraphError::Duplicate`] if the id exists.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::Duplicate { id: node.id });
        }
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable access to a node (hash bookkeeping only; edges go through
    /// [`Graph::add_dependency`])
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Add the edge `from -> to`.
    ///
    /// Adding an existing edge is a no-op. An edge that would close a cycle is
    /// rejected and the graph is left unchanged.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(from) {
            return Err(GraphError::NodeNotFound { id: from.to_string() });
        }
        if !self.nodes.contains_key(to) {
            return Err(GraphError::NodeNotFound { id: to.to_string() });
        }

        if self.nodes[from].dependencies.iter().any(|d| d == to) {
            return Ok(());
        }

        // The graph is acyclic before the insertion, so the new edge closes a
        // cycle exactly when `from` is already reachable from `to`.
        if self.reaches(to, from) {
            return Err(GraphError::WouldCreateCycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if let Some(node) = self.nodes.get_mut(from) {
            node.dependencies.push(to.to_string());
        }
        Ok(())
    }

    /// Whether `target` can be reached from `start` along dependency edges
    fn reaches(&self, start: &str, target: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![start];

        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    /// Full-graph cycle check: DFS with a visited set and an in-progress set
    pub fn has_cycle(&self) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_path: HashSet<&str> = HashSet::new();

        for start in &self.order {
            if visited.contains(start.as_str()) {
                continue;
            }

            // (node, index of the next dependency to explore)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            visited.insert(start.as_str());
            on_path.insert(start.as_str());

            while let Some(top) = stack.last_mut() {
                let (id, next) = *top;
                let deps = &self.nodes[id].dependencies;

                if next < deps.len() {
                    top.1 += 1;
                    let dep = deps[next].as_str();
                    if on_path.contains(dep) {
                        return true;
                    }
                    if visited.insert(dep) {
                        on_path.insert(dep);
                        stack.push((dep, 0));
                    }
                } else {
                    on_path.remove(id);
                    stack.pop();
                }
            }
        }

        false
    }

    /// Mark a node as an entry point (a final output). Idempotent.
    pub fn mark_entry_point(&mut self, id: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            return Err(GraphError::NodeNotFound { id: id.to_string() });
        }
        if !self.entry_points.iter().any(|e| e == id) {
            self.entry_points.push(id.to_string());
        }
        Ok(())
    }

    /// Entry point ids in the order they were marked
    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    /// Order nodes so that every node comes after all of its dependencies.
    ///
    /// Traversal starts at the entry points, then picks up any node they do
    /// not reach.
    pub fn topological_sort(&self) -> Result<Vec<&Node>, GraphError> {
        if self.has_cycle() {
            return Err(GraphError::CycleDetected);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut result = Vec::with_capacity(self.nodes.len());

        let starts = self
            .entry_points
            .iter()
            .chain(self.order.iter())
            .map(String::as_str);

        for start in starts {
            if !visited.insert(start) {
                continue;
            }

            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            while let Some(top) = stack.last_mut() {
                let (id, next) = *top;
                let node = &self.nodes[id];

                if next < node.dependencies.len() {
                    top.1 += 1;
                    let dep = node.dependencies[next].as_str();
                    if visited.insert(dep) {
                        stack.push((dep, 0));
                    }
                } else {
                    // post-order: all dependencies are already in `result`
                    result.push(node);
                    stack.pop();
                }
            }
        }

        Ok(result)
    }

    /// Alias for [`Graph::topological_sort`]
    pub fn build_order(&self) -> Result<Vec<&Node>, GraphError> {
        self.topological_sort()
    }

    /// Nodes with a direct edge to `id`
    pub fn dependents(&self, id: &str) -> Vec<&Node> {
        self.order
            .iter()
            .map(|n| &self.nodes[n])
            .filter(|n| n.dependencies.iter().any(|d| d == id))
            .collect()
    }

    /// Nodes that depend on `id` directly or transitively
    pub fn dependents_recursive(&self, id: &str) -> Vec<&Node> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut result = Vec::new();
        let mut stack = vec![id];
        visited.insert(id);

        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                if visited.insert(dependent.id.as_str()) {
                    result.push(dependent);
                    stack.push(dependent.id.as_str());
                }
            }
        }

        result
    }
}
