//! Node Registry and Traversals
//!
//! The scheduler owns every node of a graph, indexed by id in registration
//! order, and provides the traversals the model needs:
//!
//! 1. Invalidation: breadth-first over child edges from a changed node, with
//!    a visited set so diamond-shaped graphs visit each node once.
//! 2. Evaluation order: Kahn's algorithm restricted to a subset of nodes, so
//!    parents are always refreshed before the children that read them.
//! 3. Reachability: the child-edge path between two nodes, used to reject an
//!    edge that would close a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use super::node::{Node, NodeId};

/// The node registry of a graph.
#[derive(Debug, Default, Clone)]
pub struct Scheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: IndexMap<NodeId, Node>,

    next_id: u32,
}

impl Scheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the id for the next node.
    pub fn next_id(&mut self) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Add a node and link it as a child of each of its parent nodes.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        let parents = node.parent_nodes();
        self.nodes.insert(id, node);
        for parent in parents {
            self.add_edge(parent, id);
        }
        id
    }

    /// Remove a node that has no children.
    ///
    /// Only used to discard a node whose initialization failed.
    pub fn remove_leaf(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.shift_remove(&node_id)?;
        debug_assert!(node.children().is_empty(), "removed node has children");
        for parent in node.parent_nodes() {
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.remove_child(node_id);
            }
        }
        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Record `child` as a dependent of `parent`.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.add_child(child);
        }
    }

    /// Drop the back-link unless `child` still binds `parent` under another name.
    pub fn remove_edge(&mut self, parent: NodeId, child: NodeId) {
        let still_bound = self
            .nodes
            .get(&child)
            .is_some_and(|c| c.parent_nodes().contains(&parent));
        if still_bound {
            return;
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.remove_child(child);
        }
    }

    /// Nodes reachable from `source` through child edges, excluding `source`,
    /// in breadth-first order.
    pub fn descendants(&self, source: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(source);

        if let Some(node) = self.nodes.get(&source) {
            queue.extend(node.children().iter().copied());
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            result.push(node_id);
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.children().iter().copied());
            }
        }

        result
    }

    /// Nodes reachable from `source` through parent edges, excluding `source`.
    pub fn ancestors(&self, source: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![source];
        visited.insert(source);

        while let Some(node_id) = stack.pop() {
            if let Some(node) = self.nodes.get(&node_id) {
                for parent in node.parent_nodes() {
                    if visited.insert(parent) {
                        result.push(parent);
                        stack.push(parent);
                    }
                }
            }
        }

        result
    }

    /// Mark `source` and every descendant stale.
    ///
    /// Returns the invalidated ids, `source` first.
    pub fn mark_changed(&mut self, source: NodeId) -> Vec<NodeId> {
        let mut changed = vec![source];
        changed.extend(self.descendants(source));
        for id in &changed {
            if let Some(node) = self.nodes.get_mut(id) {
                node.invalidate();
            }
        }
        changed
    }

    /// The child-edge path from `from` to `to`, both included.
    pub fn path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut previous: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(node_id) = queue.pop_front() {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            for &child in node.children() {
                if child == from || previous.contains_key(&child) {
                    continue;
                }
                previous.insert(child, node_id);
                if child == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&prev) = previous.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(child);
            }
        }

        None
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Returns nodes in order such that parents come before children. Only
    /// edges inside the given set are considered.
    pub fn topological_sort(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .parent_nodes()
                    .iter()
                    .filter(|p| node_set.contains(p))
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
                for child in node.children() {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        result
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
