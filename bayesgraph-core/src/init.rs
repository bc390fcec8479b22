//! Initialization
//!
//! A freshly declared stochastic node must start with a finite
//! log-probability. When its proposed value is impossible, the initializer
//! runs a bounded search:
//!
//! 1. Redraw the node itself, if it is latent and its value was not given
//!    explicitly.
//! 2. Redraw eligible upstream stochastic nodes (latent, sampleable, not
//!    explicitly valued, within [`InitPolicy::upstream_depth`] stochastic
//!    layers) and test again, one round at a time.
//! 3. Give up with [`ModelError::InvalidInitialization`], restoring every
//!    redrawn parent to the value it had before the search.
//!
//! A round is only accepted if every other stochastic descendant of the
//! redrawn parents still has a finite log-probability, so an earlier valid
//! node is never broken to make room for a new one.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::config::InitPolicy;
use crate::density::is_valid_logp;
use crate::error::{ModelError, Result};
use crate::graph::{ModelGraph, NodeId, NodeKind, ValueSource};
use crate::value::Value;

/// What the initializer had to do to reach a valid starting point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Redraws of the node itself.
    pub self_redraws: usize,

    /// Upstream redraw rounds.
    pub parent_rounds: usize,

    /// Names of the parents whose values were replaced.
    pub redrawn_parents: Vec<String>,
}

impl InitReport {
    pub fn needed_redraw(&self) -> bool {
        self.self_redraws > 0 || self.parent_rounds > 0
    }
}

/// Runs the bounded redraw search for one node.
pub struct Initializer<'g> {
    graph: &'g mut ModelGraph,
    policy: InitPolicy,
    attempts: usize,
    report: InitReport,
}

impl<'g> Initializer<'g> {
    pub fn new(graph: &'g mut ModelGraph, policy: InitPolicy) -> Self {
        Self {
            graph,
            policy,
            attempts: 0,
            report: InitReport::default(),
        }
    }

    /// Bring `id` to a finite log-probability or fail.
    ///
    /// Usage errors raised while evaluating the density propagate at once;
    /// only impossible values are retried.
    pub fn run(mut self, id: NodeId) -> Result<InitReport> {
        if self.check(id)? {
            return Ok(self.accept(id));
        }

        let redrawable = self
            .graph
            .node(id)?
            .as_stochastic()
            .is_some_and(|s| s.is_redrawable());

        if redrawable && self.redraw_self(id)? {
            return Ok(self.accept(id));
        }

        let upstream = self.eligible_upstream(id)?;
        if !upstream.is_empty() && self.policy.parent_rounds > 0 {
            let saved = self.snapshot(&upstream)?;
            match self.search_upstream(id, &upstream, &saved, redrawable) {
                Ok(true) => {
                    self.report.redrawn_parents = upstream
                        .iter()
                        .filter_map(|p| self.graph.name(*p).ok())
                        .map(str::to_string)
                        .collect();
                    return Ok(self.accept(id));
                }
                Ok(false) => self.restore(saved),
                Err(err) => {
                    self.restore(saved);
                    return Err(err);
                }
            }
        }

        let node = self.graph.name(id)?.to_string();
        debug!(node = %node, attempts = self.attempts, "initialization failed");
        Err(ModelError::InvalidInitialization {
            node,
            attempts: self.attempts,
        })
    }

    /// Redraw rounds over `upstream`. Returns whether the node became valid.
    /// Parents are left as last drawn; the caller restores them.
    fn search_upstream(
        &mut self,
        id: NodeId,
        upstream: &[NodeId],
        saved: &[(NodeId, Value, ValueSource)],
        redrawable: bool,
    ) -> Result<bool> {
        let guarded = self.guarded_descendants(upstream, id);
        for _ in 0..self.policy.parent_rounds {
            self.report.parent_rounds += 1;
            for &parent in upstream {
                self.redraw_parent(parent, saved)?;
            }

            if self.others_valid(&guarded)? {
                if self.check(id)? || (redrawable && self.redraw_self(id)?) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn restore(&mut self, saved: Vec<(NodeId, Value, ValueSource)>) {
        for (parent, value, source) in saved {
            self.graph.restore(parent, value, source);
        }
    }

    /// Evaluate the node once, counting the attempt.
    fn check(&mut self, id: NodeId) -> Result<bool> {
        self.attempts += 1;
        Ok(is_valid_logp(self.graph.logp(id)?))
    }

    fn redraw_self(&mut self, id: NodeId) -> Result<bool> {
        for _ in 0..self.policy.self_redraws {
            self.graph.redraw(id)?;
            self.report.self_redraws += 1;
            if self.check(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Redraw a parent until its own log-probability is finite. If no draw
    /// succeeds the parent keeps its saved value.
    fn redraw_parent(&mut self, parent: NodeId, saved: &[(NodeId, Value, ValueSource)]) -> Result<()> {
        for _ in 0..self.policy.self_redraws.max(1) {
            self.graph.redraw(parent)?;
            if is_valid_logp(self.graph.logp(parent)?) {
                return Ok(());
            }
        }
        if let Some((_, value, source)) = saved.iter().find(|(id, _, _)| *id == parent) {
            self.graph.restore(parent, value.clone(), *source);
        }
        Ok(())
    }

    /// Latent ancestors the search may redraw, ancestors first.
    fn eligible_upstream(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut eligible = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(id, 0usize)];

        while let Some((node_id, depth)) = stack.pop() {
            for parent in self.graph.node(node_id)?.parent_nodes() {
                if !visited.insert(parent) {
                    continue;
                }
                match self.graph.node(parent)?.kind() {
                    NodeKind::Deterministic(_) => stack.push((parent, depth)),
                    NodeKind::Stochastic(s) => {
                        let depth = depth + 1;
                        if depth > self.policy.upstream_depth {
                            continue;
                        }
                        if s.is_redrawable() {
                            eligible.push(parent);
                        }
                        if depth < self.policy.upstream_depth {
                            stack.push((parent, depth));
                        }
                    }
                }
            }
        }

        Ok(self.graph.scheduler().topological_sort(&eligible))
    }

    fn snapshot(&mut self, ids: &[NodeId]) -> Result<Vec<(NodeId, Value, ValueSource)>> {
        let mut saved = Vec::with_capacity(ids.len());
        for &id in ids {
            let source = self
                .graph
                .node(id)?
                .as_stochastic()
                .map_or(ValueSource::Default, |s| s.source());
            saved.push((id, self.graph.value(id)?, source));
        }
        Ok(saved)
    }

    /// Stochastic descendants of the redrawn parents other than the node
    /// being initialized.
    fn guarded_descendants(&self, parents: &[NodeId], id: NodeId) -> Vec<NodeId> {
        let parents: HashSet<NodeId> = parents.iter().copied().collect();
        let mut guarded: Vec<NodeId> = Vec::new();
        for &parent in &parents {
            for node_id in self.graph.scheduler().descendants(parent) {
                let is_stochastic = self
                    .graph
                    .scheduler()
                    .get_node(node_id)
                    .is_some_and(|n| n.is_stochastic());
                if node_id != id
                    && is_stochastic
                    && !parents.contains(&node_id)
                    && !guarded.contains(&node_id)
                {
                    guarded.push(node_id);
                }
            }
        }
        guarded
    }

    fn others_valid(&mut self, guarded: &[NodeId]) -> Result<bool> {
        for &node_id in guarded {
            if !is_valid_logp(self.graph.logp(node_id)?) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn accept(mut self, id: NodeId) -> InitReport {
        let report = std::mem::take(&mut self.report);
        if report.needed_redraw() && self.policy.warn_on_redraw {
            let node = self.graph.name(id).unwrap_or_default();
            warn!(
                node,
                self_redraws = report.self_redraws,
                parent_rounds = report.parent_rounds,
                redrawn_parents = ?report.redrawn_parents,
                "node needed redraws to reach a valid initial value"
            );
        }
        self.graph.set_init_report(id, report.clone());
        report
    }
}
