//! Graph Nodes
//!
//! This module defines the vertices of the model graph: stochastic variables
//! (latent or observed) and deterministic transformations of their parents.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::density::{LogDensity, Params};
use crate::error::Result;
use crate::init::InitReport;
use crate::value::Value;

/// Identifier of a node, unique within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// One entry of a node's parent mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Parent {
    /// A fixed parameter value.
    Const(Value),
    /// Another node of the same graph.
    Node(NodeId),
    /// Another node, referred to by name. Resolved to [`Parent::Node`] when
    /// the child is registered.
    Named(String),
}

impl Parent {
    pub fn named(name: impl Into<String>) -> Self {
        Parent::Named(name.into())
    }

    pub fn node(&self) -> Option<NodeId> {
        match self {
            Parent::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<NodeId> for Parent {
    fn from(id: NodeId) -> Self {
        Parent::Node(id)
    }
}

impl From<Value> for Parent {
    fn from(v: Value) -> Self {
        Parent::Const(v)
    }
}

impl From<f64> for Parent {
    fn from(v: f64) -> Self {
        Parent::Const(Value::Real(v))
    }
}

impl From<i64> for Parent {
    fn from(v: i64) -> Self {
        Parent::Const(Value::Int(v))
    }
}

/// Whether the cached value / log-probability reflects the current inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// The cache is up-to-date.
    Valid,

    /// An input changed since the cache was filled.
    Stale,
}

/// Where a stochastic node's current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// Supplied by the caller. Never redrawn by the initializer.
    Explicit,
    /// A declared default the initializer may replace.
    Default,
    /// Drawn from the node's own distribution.
    Drawn,
}

impl ValueSource {
    /// Whether the initializer may replace the value.
    pub fn is_redrawable(&self) -> bool {
        !matches!(self, ValueSource::Explicit)
    }
}

pub type ComputeFn = dyn Fn(&Params) -> Result<Value> + Send + Sync;

/// A random variable with its own log-density.
#[derive(Clone)]
pub struct Stochastic {
    pub(crate) density: Arc<dyn LogDensity>,
    pub(crate) observed: bool,
    pub(crate) source: ValueSource,
    pub(crate) cached_logp: Option<f64>,
    pub(crate) init: InitReport,
}

impl Stochastic {
    pub fn density(&self) -> &dyn LogDensity {
        self.density.as_ref()
    }

    pub fn observed(&self) -> bool {
        self.observed
    }

    pub fn source(&self) -> ValueSource {
        self.source
    }

    /// Non-observed, not explicitly valued, and backed by a sampler.
    pub fn is_redrawable(&self) -> bool {
        !self.observed && self.source.is_redrawable() && self.density.can_sample()
    }
}

/// A pure function of the parent values.
#[derive(Clone)]
pub struct Deterministic {
    pub(crate) compute: Arc<ComputeFn>,
}

/// The kind of node in the model graph.
#[derive(Clone)]
pub enum NodeKind {
    Stochastic(Stochastic),
    Deterministic(Deterministic),
}

/// A node in the model graph.
#[derive(Clone)]
pub struct Node {
    /// Unique identifier for this node.
    pub(crate) id: NodeId,

    pub(crate) name: String,

    /// Parameter name to parent binding. After registration no entry is
    /// [`Parent::Named`].
    pub(crate) parents: IndexMap<String, Parent>,

    /// Nodes that bind this node as a parent. Maintained by the graph.
    pub(crate) children: SmallVec<[NodeId; 4]>,

    /// Current value. `None` only for a deterministic node never computed.
    pub(crate) value: Option<Value>,

    pub(crate) state: CacheState,

    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        name: String,
        parents: IndexMap<String, Parent>,
        value: Option<Value>,
        kind: NodeKind,
    ) -> Self {
        Self {
            id,
            name,
            parents,
            children: SmallVec::new(),
            value,
            state: CacheState::Stale,
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn parents(&self) -> &IndexMap<String, Parent> {
        &self.parents
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The cached value without triggering recomputation.
    pub fn cached_value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == CacheState::Valid
    }

    pub fn as_stochastic(&self) -> Option<&Stochastic> {
        match &self.kind {
            NodeKind::Stochastic(s) => Some(s),
            NodeKind::Deterministic(_) => None,
        }
    }

    pub fn is_stochastic(&self) -> bool {
        self.as_stochastic().is_some()
    }

    pub fn is_observed(&self) -> bool {
        self.as_stochastic().is_some_and(|s| s.observed)
    }

    /// Ids of parent nodes, without duplicates.
    pub fn parent_nodes(&self) -> SmallVec<[NodeId; 4]> {
        let mut ids: SmallVec<[NodeId; 4]> = SmallVec::new();
        for id in self.parents.values().filter_map(Parent::node) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.retain(|c| *c != child);
    }

    /// Drop the cache. Stochastic nodes forget their log-probability,
    /// deterministic nodes keep their last value until recomputed.
    pub(crate) fn invalidate(&mut self) {
        self.state = CacheState::Stale;
        if let NodeKind::Stochastic(s) = &mut self.kind {
            s.cached_logp = None;
        }
    }

    pub(crate) fn stochastic_mut(&mut self) -> Option<&mut Stochastic> {
        match &mut self.kind {
            NodeKind::Stochastic(s) => Some(s),
            NodeKind::Deterministic(_) => None,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            NodeKind::Stochastic(s) if s.observed => "observed",
            NodeKind::Stochastic(_) => "stochastic",
            NodeKind::Deterministic(_) => "deterministic",
        };
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &kind)
            .field("value", &self.value)
            .field("state", &self.state)
            .field("children", &self.children)
            .finish()
    }
}
