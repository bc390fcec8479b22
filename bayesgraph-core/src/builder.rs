//! Node Declaration
//!
//! [`NodeBuilder`] collects everything needed to declare a node (name,
//! initial value, parent mapping, density or compute function, observed flag)
//! and registers it with a [`ModelGraph`]. Building a stochastic node runs the
//! initializer, so a node that builds successfully always starts with a finite
//! log-probability.
//!
//! ```rust
//! use bayesgraph_core::builder::NodeBuilder;
//! use bayesgraph_core::density::{Exponential, Poisson};
//! use bayesgraph_core::graph::ModelGraph;
//!
//! let mut graph = ModelGraph::with_seed(42);
//! let rate = NodeBuilder::stochastic("rate", Exponential)
//!     .parent("rate", 1.0)
//!     .default_value(1.0)
//!     .build(&mut graph)?;
//! let counts = NodeBuilder::data("counts", Poisson, vec![4_i64, 5, 4, 0, 1])
//!     .parent("mu", rate)
//!     .build(&mut graph)?;
//!
//! assert!(graph.is_observed(counts)?);
//! assert!(graph.joint_logp()?.is_finite());
//! # Ok::<(), bayesgraph_core::ModelError>(())
//! ```
//!
//! Declarations that refer to each other by name can be registered together
//! with [`assemble`], which orders them and rejects cycles before anything is
//! added to the graph.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::InitPolicy;
use crate::density::{LogDensity, Params};
use crate::error::{ImmutableReason, ModelError, Result, UsageError};
use crate::graph::{ComputeFn, Deterministic, ModelGraph, NodeId, NodeKind, Parent, Stochastic, ValueSource};
use crate::init::{InitReport, Initializer};
use crate::value::Value;

enum Definition {
    Stochastic(Arc<dyn LogDensity>),
    Deterministic(Arc<ComputeFn>),
}

/// Declaration of one node.
pub struct NodeBuilder {
    name: String,
    definition: Definition,
    parents: IndexMap<String, Parent>,
    value: Option<(Value, ValueSource)>,
    observed: bool,
    policy: Option<InitPolicy>,
}

impl NodeBuilder {
    /// A latent random variable.
    pub fn stochastic(name: impl Into<String>, density: impl LogDensity + 'static) -> Self {
        Self::with_density(name, Arc::new(density))
    }

    /// A latent random variable with a density shared between nodes.
    pub fn with_density(name: impl Into<String>, density: Arc<dyn LogDensity>) -> Self {
        Self {
            name: name.into(),
            definition: Definition::Stochastic(density),
            parents: IndexMap::new(),
            value: None,
            observed: false,
            policy: None,
        }
    }

    /// An observed random variable holding fixed data.
    pub fn data(
        name: impl Into<String>,
        density: impl LogDensity + 'static,
        value: impl Into<Value>,
    ) -> Self {
        Self::stochastic(name, density).value(value).observed(true)
    }

    /// A deterministic function of the parent values.
    pub fn deterministic<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Params) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            definition: Definition::Deterministic(Arc::new(compute)),
            parents: IndexMap::new(),
            value: None,
            observed: false,
            policy: None,
        }
    }

    /// Bind a parameter to a constant, a node id, or a node name.
    pub fn parent(mut self, parameter: impl Into<String>, parent: impl Into<Parent>) -> Self {
        self.parents.insert(parameter.into(), parent.into());
        self
    }

    /// Initial value the initializer must keep.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some((value.into(), ValueSource::Explicit));
        self
    }

    /// Initial value the initializer may redraw.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some((value.into(), ValueSource::Default));
        self
    }

    /// Mark the node as observed data. Observed values never change.
    pub fn observed(mut self, observed: bool) -> Self {
        self.observed = observed;
        self
    }

    /// Override the graph's initialization policy for this node.
    pub fn init_policy(mut self, policy: InitPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of parents given as [`Parent::Named`].
    fn named_parents(&self) -> impl Iterator<Item = &str> {
        self.parents.values().filter_map(|p| match p {
            Parent::Named(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Register the node and bring it to a valid initial state.
    pub fn build(self, graph: &mut ModelGraph) -> Result<NodeId> {
        if graph.node_id(&self.name).is_some() {
            return Err(UsageError::DuplicateName(self.name).into());
        }
        if self.named_parents().any(|p| p == self.name) {
            return Err(ModelError::CyclicGraph {
                path: vec![self.name.clone(), self.name],
            });
        }

        let mut parents = IndexMap::with_capacity(self.parents.len());
        for (parameter, parent) in self.parents {
            parents.insert(parameter, graph.resolve_parent(&self.name, parent)?);
        }

        match self.definition {
            Definition::Stochastic(density) => {
                check_parameters(&self.name, density.as_ref(), &parents)?;
                let (value, source) = match self.value {
                    Some((value, _)) if self.observed => (Some(value), ValueSource::Explicit),
                    Some((value, source)) => (Some(value), source),
                    None if self.observed || !density.can_sample() => {
                        return Err(UsageError::MissingValue { node: self.name }.into());
                    }
                    None => (None, ValueSource::Drawn),
                };
                let kind = NodeKind::Stochastic(Stochastic {
                    density,
                    observed: self.observed,
                    source,
                    cached_logp: None,
                    init: InitReport::default(),
                });
                let needs_draw = value.is_none();
                let policy = self.policy.unwrap_or_else(|| graph.init_policy());
                let id = graph.insert(self.name, parents, value, kind)?;

                let initialized = if needs_draw {
                    graph.redraw(id)
                } else {
                    Ok(())
                }
                .and_then(|()| Initializer::new(graph, policy).run(id));

                match initialized {
                    Ok(_) => Ok(id),
                    Err(err) => {
                        graph.discard(id);
                        Err(err)
                    }
                }
            }
            Definition::Deterministic(compute) => {
                if self.observed || self.value.is_some() {
                    return Err(ModelError::ImmutableValue {
                        node: self.name,
                        reason: ImmutableReason::Deterministic,
                    });
                }
                let kind = NodeKind::Deterministic(Deterministic { compute });
                let id = graph.insert(self.name, parents, None, kind)?;
                if let Err(err) = graph.value(id) {
                    graph.discard(id);
                    return Err(err);
                }
                Ok(id)
            }
        }
    }
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.definition {
            Definition::Stochastic(d) => d.name().to_string(),
            Definition::Deterministic(_) => "deterministic".to_string(),
        };
        f.debug_struct("NodeBuilder")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("parents", &self.parents)
            .field("value", &self.value)
            .field("observed", &self.observed)
            .finish()
    }
}

/// Every bound parameter must be declared by the density, and every declared
/// parameter must be bound.
fn check_parameters(
    node: &str,
    density: &dyn LogDensity,
    parents: &IndexMap<String, Parent>,
) -> Result<(), UsageError> {
    let expected = density.parameters();
    if let Some(unknown) = parents.keys().find(|k| !expected.iter().any(|p| *p == k.as_str())) {
        return Err(UsageError::UnknownParameter {
            node: node.to_string(),
            density: density.name().to_string(),
            parameter: unknown.clone(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        });
    }
    if let Some(missing) = expected.iter().find(|p| !parents.contains_key(**p)) {
        return Err(UsageError::MissingParameter {
            node: node.to_string(),
            density: density.name().to_string(),
            parameter: missing.to_string(),
        });
    }
    Ok(())
}

/// Register a batch of declarations that may refer to each other by name.
///
/// Declarations are built parents first. Duplicate names, references to
/// unknown names and cycles are all reported before any node is added. If a
/// later build fails, nodes built before it stay registered.
pub fn assemble(graph: &mut ModelGraph, builders: Vec<NodeBuilder>) -> Result<Vec<NodeId>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(builders.len());
    for (i, builder) in builders.iter().enumerate() {
        if index.insert(builder.name(), i).is_some() || graph.node_id(builder.name()).is_some() {
            return Err(UsageError::DuplicateName(builder.name().to_string()).into());
        }
    }

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(builders.len());
    for builder in &builders {
        let mut own = Vec::new();
        for name in builder.named_parents() {
            match index.get(name) {
                Some(&j) => own.push(j),
                None if graph.node_id(name).is_some() => {}
                None => {
                    return Err(UsageError::DanglingParent {
                        node: builder.name().to_string(),
                        parent: name.to_string(),
                    }
                    .into());
                }
            }
        }
        deps.push(own);
    }

    let mut order = Vec::with_capacity(builders.len());
    let mut marks = vec![Mark::Unvisited; builders.len()];
    let mut path = Vec::new();
    for i in 0..builders.len() {
        visit(i, &deps, &mut marks, &mut path, &mut order).map_err(|cycle| {
            ModelError::CyclicGraph {
                path: cycle.iter().map(|&j| builders[j].name().to_string()).collect(),
            }
        })?;
    }

    let mut slots: Vec<Option<NodeBuilder>> = builders.into_iter().map(Some).collect();
    let mut ids = vec![None; slots.len()];
    for i in order {
        if let Some(builder) = slots[i].take() {
            ids[i] = Some(builder.build(graph)?);
        }
    }
    Ok(ids.into_iter().flatten().collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first post-order. On a cycle returns the declaration indices along
/// it, first and last equal.
fn visit(
    i: usize,
    deps: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    match marks[i] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            let start = path.iter().position(|&j| j == i).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(i);
            return Err(cycle);
        }
        Mark::Unvisited => {}
    }
    marks[i] = Mark::InProgress;
    path.push(i);
    for &j in &deps[i] {
        visit(j, deps, marks, path, order)?;
    }
    path.pop();
    marks[i] = Mark::Done;
    order.push(i);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::{Exponential, Normal};

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::stochastic("alpha", Normal)
            .parent("values", Value::from(vec![1.0, 2.0]))
            .parent("mu", 1.0)
            .parent("tau", 1.0)
            .build(&mut graph)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Usage(UsageError::UnknownParameter { ref parameter, .. }) if parameter == "values"
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn missing_parameter_is_rejected() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::stochastic("alpha", Normal)
            .parent("mu", 1.0)
            .value(0.0)
            .build(&mut graph)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Usage(UsageError::MissingParameter { ref parameter, .. }) if parameter == "tau"
        ));
    }

    #[test]
    fn observed_without_value_is_rejected() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::stochastic("d", Exponential)
            .parent("rate", 1.0)
            .observed(true)
            .build(&mut graph)
            .unwrap_err();
        assert!(matches!(err, ModelError::Usage(UsageError::MissingValue { .. })));
    }

    #[test]
    fn missing_value_is_drawn() {
        let mut graph = ModelGraph::with_seed(0);
        let id = NodeBuilder::stochastic("e", Exponential)
            .parent("rate", 2.0)
            .build(&mut graph)
            .unwrap();
        assert_eq!(
            graph.node(id).unwrap().as_stochastic().unwrap().source(),
            ValueSource::Drawn
        );
        assert!(graph.logp(id).unwrap().is_finite());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = ModelGraph::with_seed(0);
        NodeBuilder::stochastic("e", Exponential)
            .parent("rate", 1.0)
            .build(&mut graph)
            .unwrap();
        let err = NodeBuilder::stochastic("e", Exponential)
            .parent("rate", 1.0)
            .build(&mut graph)
            .unwrap_err();
        assert_eq!(err, ModelError::Usage(UsageError::DuplicateName("e".into())));
    }

    #[test]
    fn deterministic_cannot_take_a_value() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::deterministic("d", |_: &Params| Ok(Value::Real(1.0)))
            .value(2.0)
            .build(&mut graph)
            .unwrap_err();
        assert!(matches!(err, ModelError::ImmutableValue { .. }));
    }

    #[test]
    fn failing_deterministic_is_discarded() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::deterministic("d", |p: &Params| Ok(Value::Real(p.real("x")?)))
            .parent("x", Value::from(vec![1.0, 2.0]))
            .build(&mut graph)
            .unwrap_err();
        assert!(matches!(err, ModelError::Usage(UsageError::ParameterType { .. })));
        assert!(graph.node_id("d").is_none());

        let err = NodeBuilder::deterministic("ratio", |p: &Params| {
            let den = p.real("den")?;
            if den == 0.0 {
                return Err(UsageError::Compute("division by zero".into()).into());
            }
            Ok(Value::Real(1.0 / den))
        })
        .parent("den", 0.0)
        .build(&mut graph)
        .unwrap_err();
        assert_eq!(err, ModelError::Usage(UsageError::Compute("division by zero".into())));
        assert!(graph.is_empty());
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let mut graph = ModelGraph::with_seed(0);
        let err = NodeBuilder::stochastic("a", Normal)
            .parent("mu", Parent::named("a"))
            .parent("tau", 1.0)
            .value(0.0)
            .build(&mut graph)
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::CyclicGraph {
                path: vec!["a".into(), "a".into()],
            }
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn assemble_orders_by_name() {
        let mut graph = ModelGraph::with_seed(0);
        let ids = assemble(
            &mut graph,
            vec![
                NodeBuilder::stochastic("y", Normal)
                    .parent("mu", Parent::named("mu"))
                    .parent("tau", 1.0)
                    .value(0.0),
                NodeBuilder::stochastic("mu", Normal)
                    .parent("mu", 0.0)
                    .parent("tau", 1.0)
                    .value(0.0),
            ],
        )
        .unwrap();
        assert_eq!(ids.len(), 2);
        let y = graph.node_id("y").unwrap();
        let mu = graph.node_id("mu").unwrap();
        assert_eq!(graph.node(mu).unwrap().children(), &[y]);
        assert_eq!(graph.node(y).unwrap().parents()["mu"], Parent::Node(mu));
    }

    #[test]
    fn assemble_rejects_cycles_before_registering() {
        let mut graph = ModelGraph::with_seed(0);
        let err = assemble(
            &mut graph,
            vec![
                NodeBuilder::stochastic("free", Normal)
                    .parent("mu", 0.0)
                    .parent("tau", 1.0),
                NodeBuilder::stochastic("a", Normal)
                    .parent("mu", Parent::named("b"))
                    .parent("tau", 1.0),
                NodeBuilder::stochastic("b", Normal)
                    .parent("mu", Parent::named("a"))
                    .parent("tau", 1.0),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ModelError::CyclicGraph {
                path: vec!["a".into(), "b".into(), "a".into()],
            }
        );
        assert!(graph.is_empty());
    }

    #[test]
    fn assemble_rejects_self_reference() {
        let mut graph = ModelGraph::with_seed(0);
        let err = assemble(
            &mut graph,
            vec![NodeBuilder::stochastic("a", Normal)
                .parent("mu", Parent::named("a"))
                .parent("tau", 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::CyclicGraph { .. }));
        assert!(graph.is_empty());
    }

    #[test]
    fn assemble_rejects_dangling_names() {
        let mut graph = ModelGraph::with_seed(0);
        let err = assemble(
            &mut graph,
            vec![NodeBuilder::stochastic("a", Normal)
                .parent("mu", Parent::named("ghost"))
                .parent("tau", 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::Usage(UsageError::DanglingParent { .. })));
    }
}
