//! Model Graph
//!
//! [`ModelGraph`] owns every node of a model and is the only way to read or
//! change node state. Values and log-probabilities are cached per node and
//! recomputed lazily:
//!
//! - Assigning a stochastic value (explicitly or by sampling) marks the node
//!   and all of its descendants stale.
//! - Reading a stale deterministic value recomputes it and any stale
//!   deterministic ancestors, parents first.
//! - Reading a stale log-probability re-evaluates the node's density against
//!   the current parent values.
//!
//! All operations take `&mut self`: evaluation is single-threaded and callers
//! serialize access.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, trace};

use super::node::{CacheState, Node, NodeId, NodeKind, Parent, ValueSource};
use super::scheduler::Scheduler;
use crate::config::{GraphConfig, InitPolicy};
use crate::density::{is_valid_logp, Params};
use crate::error::{ImmutableReason, ModelError, Result, UsageError};
use crate::init::InitReport;
use crate::value::{Shape, Value};

/// A directed acyclic graph of stochastic and deterministic nodes.
pub struct ModelGraph {
    scheduler: Scheduler,
    names: HashMap<String, NodeId>,
    rng: StdRng,
    config: GraphConfig,
}

impl ModelGraph {
    /// Create an empty graph seeded from entropy.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create an empty graph with a reproducible random source.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_config(GraphConfig::seeded(seed))
    }

    pub fn with_config(config: GraphConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            scheduler: Scheduler::new(),
            names: HashMap::new(),
            rng,
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// The initialization policy applied to nodes that do not override it.
    pub fn init_policy(&self) -> InitPolicy {
        self.config.init
    }

    pub fn len(&self) -> usize {
        self.scheduler.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.scheduler.contains(id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.scheduler.get_node(id).ok_or(ModelError::UnknownNode(id))
    }

    /// Look up a node by name.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(self.node(id)?.name())
    }

    pub fn is_valid(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_valid())
    }

    pub fn is_observed(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_observed())
    }

    pub fn parents(&self, id: NodeId) -> Result<&IndexMap<String, Parent>> {
        Ok(self.node(id)?.parents())
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    pub fn init_report(&self, id: NodeId) -> Result<Option<&InitReport>> {
        Ok(self.node(id)?.as_stochastic().map(|s| &s.init))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.scheduler.nodes()
    }

    /// Ids of all stochastic nodes, in registration order.
    pub fn stochastics(&self) -> Vec<NodeId> {
        self.scheduler
            .nodes()
            .filter(|n| n.is_stochastic())
            .map(Node::id)
            .collect()
    }

    pub fn descendants(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.node(id)?;
        Ok(self.scheduler.descendants(id))
    }

    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.node(id)?;
        Ok(self.scheduler.ancestors(id))
    }

    /// Every node, parents before children.
    pub fn evaluation_order(&self) -> Vec<NodeId> {
        let ids: Vec<NodeId> = self.scheduler.ids().collect();
        self.scheduler.topological_sort(&ids)
    }

    /// Current value of a node.
    ///
    /// A stale deterministic node is recomputed first, so the returned value
    /// always reflects the current parent values.
    pub fn value(&mut self, id: NodeId) -> Result<Value> {
        if !self.node(id)?.is_valid() && !self.node(id)?.is_stochastic() {
            self.refresh(id)?;
        }
        let node = self.node(id)?;
        node.cached_value()
            .cloned()
            .ok_or_else(|| missing_value(node))
    }

    /// Assign a value to a latent stochastic node.
    ///
    /// The node and all of its descendants become stale. Observed and
    /// deterministic nodes reject the assignment.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>) -> Result<()> {
        self.check_mutable(id)?;
        self.assign(id, value.into(), ValueSource::Explicit);
        Ok(())
    }

    /// Log-probability of a stochastic node given its current parents.
    pub fn logp(&mut self, id: NodeId) -> Result<f64> {
        let node = self.node(id)?;
        let Some(stochastic) = node.as_stochastic() else {
            return Err(UsageError::NotStochastic {
                node: node.name().to_string(),
            }
            .into());
        };
        if node.is_valid() {
            if let Some(logp) = stochastic.cached_logp {
                return Ok(logp);
            }
        }

        let density = Arc::clone(&stochastic.density);
        let params = self.resolve_params(id)?;
        let node = self.node(id)?;
        let value = node.cached_value().ok_or_else(|| missing_value(node))?;
        let logp = density
            .logp(value, &params)
            .map_err(|err| in_context(err, node.name(), density.name()))?;
        trace!(node = node.name(), logp, "recomputed log-probability");

        if let Some(node) = self.scheduler.get_node_mut(id) {
            if let Some(s) = node.stochastic_mut() {
                s.cached_logp = Some(logp);
            }
            node.state = CacheState::Valid;
        }
        Ok(logp)
    }

    /// Draw a new value for a latent stochastic node from its own
    /// distribution, using the graph's random source.
    pub fn sample(&mut self, id: NodeId) -> Result<Value> {
        self.check_mutable(id)?;
        let value = self.draw(id)?;
        self.assign(id, value.clone(), ValueSource::Drawn);
        Ok(value)
    }

    /// Sum of the log-probabilities of every stochastic node, observed nodes
    /// included. Any non-finite term makes the whole sum `-inf`.
    pub fn joint_logp(&mut self) -> Result<f64> {
        let ids = self.stochastics();
        self.sum_logp(&ids)
    }

    /// Joint log-probability of the sub-model made of `roots` and all of their
    /// ancestors.
    pub fn joint_logp_from(&mut self, roots: &[NodeId]) -> Result<f64> {
        let mut members: HashSet<NodeId> = HashSet::new();
        for &root in roots {
            self.node(root)?;
            members.insert(root);
            members.extend(self.scheduler.ancestors(root));
        }
        let ids: Vec<NodeId> = self
            .stochastics()
            .into_iter()
            .filter(|id| members.contains(id))
            .collect();
        self.sum_logp(&ids)
    }

    /// Rebind one of `child`'s parameters to a different parent.
    ///
    /// Fails with [`ModelError::CyclicGraph`] if the new parent is `child`
    /// itself or one of its descendants. The graph is unchanged on error.
    pub fn rebind_parent(
        &mut self,
        child: NodeId,
        parameter: &str,
        parent: impl Into<Parent>,
    ) -> Result<()> {
        let node = self.node(child)?;
        if !node.parents().contains_key(parameter) {
            return Err(UsageError::UnknownParameter {
                node: node.name().to_string(),
                density: kind_name(node).to_string(),
                parameter: parameter.to_string(),
                expected: node.parents().keys().cloned().collect(),
            }
            .into());
        }
        let child_name = node.name().to_string();
        let parent = self.resolve_parent(&child_name, parent.into())?;

        if let Parent::Node(parent_id) = parent {
            if let Some(path) = self.scheduler.path(child, parent_id) {
                let mut names = self.names_of(&path);
                names.push(child_name);
                return Err(ModelError::CyclicGraph { path: names });
            }
        }

        let previous = self
            .scheduler
            .get_node_mut(child)
            .and_then(|n| n.parents.insert(parameter.to_string(), parent.clone()));
        if let Some(Parent::Node(old)) = previous {
            self.scheduler.remove_edge(old, child);
        }
        if let Parent::Node(new) = parent {
            self.scheduler.add_edge(new, child);
        }
        let changed = self.scheduler.mark_changed(child);
        debug!(node = %child_name, parameter, invalidated = changed.len(), "rebound parent");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Crate-internal operations used by the builder and the initializer
    // ------------------------------------------------------------------

    /// Register a node. Parents must already be resolved and present.
    pub(crate) fn insert(
        &mut self,
        name: String,
        parents: IndexMap<String, Parent>,
        value: Option<Value>,
        kind: NodeKind,
    ) -> Result<NodeId> {
        if self.names.contains_key(&name) {
            return Err(UsageError::DuplicateName(name).into());
        }
        for parent in parents.values() {
            match parent {
                Parent::Node(id) if !self.contains(*id) => {
                    return Err(ModelError::UnknownNode(*id));
                }
                Parent::Named(other) => {
                    return Err(UsageError::DanglingParent {
                        node: name,
                        parent: other.clone(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        let id = self.scheduler.next_id();
        debug!(node = %name, id = id.raw(), parents = parents.len(), "registered node");
        self.names.insert(name.clone(), id);
        self.scheduler.add_node(Node::new(id, name, parents, value, kind));
        Ok(id)
    }

    /// Unregister a node that failed to initialize.
    pub(crate) fn discard(&mut self, id: NodeId) {
        if let Some(node) = self.scheduler.remove_leaf(id) {
            debug!(node = node.name(), "discarded node");
            self.names.remove(node.name());
        }
    }

    /// Turn a [`Parent::Named`] into a [`Parent::Node`].
    pub(crate) fn resolve_parent(&self, child: &str, parent: Parent) -> Result<Parent> {
        match parent {
            Parent::Named(name) => match self.node_id(&name) {
                Some(id) => Ok(Parent::Node(id)),
                None => Err(UsageError::DanglingParent {
                    node: child.to_string(),
                    parent: name,
                }
                .into()),
            },
            Parent::Node(id) if !self.contains(id) => Err(ModelError::UnknownNode(id)),
            other => Ok(other),
        }
    }

    /// Draw a value from the node's density without assigning it.
    pub(crate) fn draw(&mut self, id: NodeId) -> Result<Value> {
        let params = self.resolve_params(id)?;
        let node = self
            .scheduler
            .get_node(id)
            .ok_or(ModelError::UnknownNode(id))?;
        let Some(stochastic) = node.as_stochastic() else {
            return Err(UsageError::NotStochastic {
                node: node.name().to_string(),
            }
            .into());
        };
        let shape = node.cached_value().map_or(Shape::Scalar, Value::shape);
        match stochastic.density.sample(&params, shape, &mut self.rng) {
            Some(value) => {
                value.map_err(|err| in_context(err, node.name(), stochastic.density.name()))
            }
            None => Err(UsageError::NotSampleable {
                node: node.name().to_string(),
            }
            .into()),
        }
    }

    /// Draw and assign, bypassing the observed check. Callers guarantee the
    /// node is a redrawable stochastic.
    pub(crate) fn redraw(&mut self, id: NodeId) -> Result<()> {
        let value = self.draw(id)?;
        self.assign(id, value, ValueSource::Drawn);
        Ok(())
    }

    /// Put back a value saved before a redraw.
    pub(crate) fn restore(&mut self, id: NodeId, value: Value, source: ValueSource) {
        self.assign(id, value, source);
    }

    pub(crate) fn set_init_report(&mut self, id: NodeId, report: InitReport) {
        if let Some(s) = self.scheduler.get_node_mut(id).and_then(Node::stochastic_mut) {
            s.init = report;
        }
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_mutable(&self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let reason = match node.kind() {
            NodeKind::Deterministic(_) => ImmutableReason::Deterministic,
            NodeKind::Stochastic(s) if s.observed => ImmutableReason::Observed,
            NodeKind::Stochastic(_) => return Ok(()),
        };
        Err(ModelError::ImmutableValue {
            node: node.name().to_string(),
            reason,
        })
    }

    fn assign(&mut self, id: NodeId, value: Value, source: ValueSource) {
        let Some(node) = self.scheduler.get_node_mut(id) else {
            return;
        };
        node.value = Some(value);
        if let Some(s) = node.stochastic_mut() {
            s.source = source;
        }
        let changed = self.scheduler.mark_changed(id);
        debug!(node = ?id, invalidated = changed.len(), "value changed");
    }

    /// Recompute `id` and every stale deterministic ancestor, parents first.
    fn refresh(&mut self, id: NodeId) -> Result<()> {
        let mut stale = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![id];
        visited.insert(id);

        while let Some(node_id) = stack.pop() {
            let node = self.node(node_id)?;
            if node.is_valid() || node.is_stochastic() {
                continue;
            }
            stale.push(node_id);
            for parent in node.parent_nodes() {
                if visited.insert(parent) {
                    stack.push(parent);
                }
            }
        }

        for node_id in self.scheduler.topological_sort(&stale) {
            let params = self.collect_params(node_id)?;
            let node = self.node(node_id)?;
            let NodeKind::Deterministic(det) = node.kind() else {
                continue;
            };
            let value = (det.compute)(&params)
                .map_err(|err| in_context(err, node.name(), "deterministic"))?;
            trace!(node = node.name(), %value, "recomputed deterministic");
            if let Some(node) = self.scheduler.get_node_mut(node_id) {
                node.value = Some(value);
                node.state = CacheState::Valid;
            }
        }
        Ok(())
    }

    /// Parameter values for `id`, refreshing stale deterministic parents.
    fn resolve_params(&mut self, id: NodeId) -> Result<Params> {
        let stale: Vec<NodeId> = self
            .node(id)?
            .parent_nodes()
            .into_iter()
            .filter(|p| {
                self.scheduler
                    .get_node(*p)
                    .is_some_and(|n| !n.is_valid() && !n.is_stochastic())
            })
            .collect();
        for parent in stale {
            self.refresh(parent)?;
        }
        self.collect_params(id)
    }

    /// Parameter values for `id`, assuming every parent is up-to-date.
    fn collect_params(&self, id: NodeId) -> Result<Params> {
        let node = self.node(id)?;
        let mut params = Params::new();
        for (name, parent) in node.parents() {
            let value = match parent {
                Parent::Const(value) => value.clone(),
                Parent::Node(parent_id) => {
                    let parent = self.node(*parent_id)?;
                    parent
                        .cached_value()
                        .cloned()
                        .ok_or_else(|| missing_value(parent))?
                }
                Parent::Named(other) => {
                    return Err(UsageError::DanglingParent {
                        node: node.name().to_string(),
                        parent: other.clone(),
                    }
                    .into());
                }
            };
            params.insert(name.clone(), value);
        }
        Ok(params)
    }

    fn sum_logp(&mut self, ids: &[NodeId]) -> Result<f64> {
        let mut total = 0.0;
        for &id in ids {
            let logp = self.logp(id)?;
            if !is_valid_logp(logp) {
                return Ok(f64::NEG_INFINITY);
            }
            total += logp;
        }
        Ok(total)
    }

    fn names_of(&self, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.scheduler.get_node(*id))
            .map(|n| n.name().to_string())
            .collect()
    }
}

impl Default for ModelGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGraph")
            .field("nodes", &self.scheduler)
            .field("config", &self.config)
            .finish()
    }
}

fn missing_value(node: &Node) -> ModelError {
    UsageError::MissingValue {
        node: node.name().to_string(),
    }
    .into()
}

/// Name the node behind an unbound parameter read.
fn in_context(err: ModelError, node: &str, density: &str) -> ModelError {
    match err {
        ModelError::Usage(UsageError::UnboundParameter { parameter }) => {
            UsageError::MissingParameter {
                node: node.to_string(),
                density: density.to_string(),
                parameter,
            }
            .into()
        }
        other => other,
    }
}

fn kind_name(node: &Node) -> &str {
    match node.kind() {
        NodeKind::Stochastic(s) => s.density.name(),
        NodeKind::Deterministic(_) => "deterministic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use crate::density::{Exponential, Normal};

    fn chain() -> (ModelGraph, NodeId, NodeId, NodeId) {
        let mut graph = ModelGraph::with_seed(1);
        let rate = NodeBuilder::stochastic("rate", Exponential)
            .parent("rate", 1.0)
            .value(0.5)
            .build(&mut graph)
            .unwrap();
        let doubled = NodeBuilder::deterministic("doubled", |p: &Params| {
            Ok(Value::Real(2.0 * p.real("x")?))
        })
        .parent("x", rate)
        .build(&mut graph)
        .unwrap();
        let y = NodeBuilder::stochastic("y", Normal)
            .parent("mu", doubled)
            .parent("tau", 1.0)
            .value(1.0)
            .build(&mut graph)
            .unwrap();
        (graph, rate, doubled, y)
    }

    #[test]
    fn deterministic_follows_parent() {
        let (mut graph, rate, doubled, _) = chain();
        assert_eq!(graph.value(doubled).unwrap(), Value::Real(1.0));

        graph.set_value(rate, 2.0).unwrap();
        assert!(!graph.is_valid(doubled).unwrap());
        assert_eq!(graph.value(doubled).unwrap(), Value::Real(4.0));
        assert!(graph.is_valid(doubled).unwrap());
    }

    #[test]
    fn logp_is_cached_until_invalidated() {
        let (mut graph, rate, _, y) = chain();
        let first = graph.logp(y).unwrap();
        assert!(graph.is_valid(y).unwrap());
        assert_eq!(graph.logp(y).unwrap(), first);

        graph.set_value(rate, 0.0).unwrap();
        assert!(!graph.is_valid(y).unwrap());
        let second = graph.logp(y).unwrap();
        assert!(second < first);
    }

    #[test]
    fn deterministic_rejects_assignment() {
        let (mut graph, _, doubled, _) = chain();
        let err = graph.set_value(doubled, 3.0).unwrap_err();
        assert!(matches!(
            err,
            ModelError::ImmutableValue {
                reason: ImmutableReason::Deterministic,
                ..
            }
        ));
        assert!(matches!(
            graph.logp(doubled),
            Err(ModelError::Usage(UsageError::NotStochastic { .. }))
        ));
    }

    #[test]
    fn rebind_rejects_cycle() {
        let (mut graph, rate, _, y) = chain();
        let err = graph.rebind_parent(rate, "rate", y).unwrap_err();
        assert_eq!(
            err,
            ModelError::CyclicGraph {
                path: vec!["rate".into(), "doubled".into(), "y".into(), "rate".into()],
            }
        );
        // unchanged
        assert!(graph.node(y).unwrap().children().is_empty());
        assert_eq!(graph.node(rate).unwrap().parents()["rate"], Parent::from(1.0));
    }

    #[test]
    fn rebind_moves_child_link() {
        let (mut graph, rate, doubled, y) = chain();
        graph.rebind_parent(y, "mu", rate).unwrap();
        assert!(graph.node(doubled).unwrap().children().is_empty());
        assert!(graph.node(rate).unwrap().children().contains(&y));
        assert!(!graph.is_valid(y).unwrap());
    }

    #[test]
    fn unbound_parameter_names_the_node() {
        let mut graph = ModelGraph::with_seed(1);
        let err = NodeBuilder::deterministic("ratio", |p: &Params| {
            Ok(Value::Real(1.0 / p.real("den")?))
        })
        .parent("num", 1.0)
        .build(&mut graph)
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "node `ratio` is missing parameter `den` required by deterministic"
        );
    }

    #[test]
    fn graph_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ModelGraph>();
    }

    #[test]
    fn evaluation_order_puts_parents_first() {
        let (graph, rate, doubled, y) = chain();
        assert_eq!(graph.evaluation_order(), vec![rate, doubled, y]);
    }
}
