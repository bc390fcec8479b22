//! Dependency Graph
//!
//! This module implements the model graph: stochastic and deterministic nodes
//! wired parent to child.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are random variables (latent or observed) or deterministic
//!   functions of other nodes
//! - Edges run from parent to child: if a child binds a parent under one of
//!   its parameter names, there is an edge from the parent to the child
//!
//! When a stochastic value changes, we traverse child edges to find every
//! affected node and mark it stale. Stale nodes recompute lazily on the next
//! read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one registry owned by the graph. A node refers to its
//!    parents and children by id only, so there is no shared ownership and no
//!    reference cycle between nodes.
//!
//! 2. Child back-links are derived data, used only for invalidation and cycle
//!    checks.
//!
//! 3. Acyclicity is checked when an edge is added, never discovered during
//!    evaluation.

mod model;
mod node;
mod scheduler;

pub use model::ModelGraph;
pub use node::{
    CacheState, ComputeFn, Deterministic, Node, NodeId, NodeKind, Parent, Stochastic, ValueSource,
};
pub use scheduler::Scheduler;
