//! BayesGraph Core
//!
//! This crate provides the node and dependency-graph core for Bayesian
//! graphical models. It implements:
//!
//! - Stochastic nodes (latent or observed random variables) and deterministic
//!   nodes (pure functions of their parents)
//! - Parent/child wiring with cycle rejection
//! - Lazy invalidation and recomputation of values and log-probabilities
//! - Joint log-probability of a whole model or a sub-model
//! - Bounded redraw initialization, so every declared node starts valid
//!
//! # Architecture
//!
//! - `value`: scalar and array node values
//! - `density`: the log-density seam and stock kernels
//! - `graph`: the node registry, traversals and the [`ModelGraph`] facade
//! - `builder`: node declaration and batch assembly
//! - `init`: the initializer's redraw search
//! - `config`: serde-backed graph and initialization settings
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust
//! use bayesgraph_core::{ModelGraph, NodeBuilder, Params, Value};
//! use bayesgraph_core::density::{Exponential, Poisson};
//!
//! let mut graph = ModelGraph::with_seed(7);
//!
//! let rate = NodeBuilder::stochastic("rate", Exponential)
//!     .parent("rate", 1.0)
//!     .default_value(2.0)
//!     .build(&mut graph)?;
//!
//! let scaled = NodeBuilder::deterministic("scaled", |p: &Params| {
//!     Ok(Value::Real(10.0 * p.real("rate")?))
//! })
//! .parent("rate", rate)
//! .build(&mut graph)?;
//!
//! let counts = NodeBuilder::data("counts", Poisson, vec![18_i64, 22, 25])
//!     .parent("mu", scaled)
//!     .build(&mut graph)?;
//!
//! let before = graph.joint_logp()?;
//! graph.set_value(rate, 1.0)?;
//!
//! // Only the descendants of `rate` went stale.
//! assert!(!graph.is_valid(counts)?);
//! assert_eq!(graph.value(scaled)?, Value::Real(10.0));
//! assert!(graph.joint_logp()? < before);
//! # Ok::<(), bayesgraph_core::ModelError>(())
//! ```

pub mod builder;
pub mod config;
pub mod density;
pub mod error;
pub mod graph;
pub mod init;
pub mod value;

pub use builder::{assemble, NodeBuilder};
pub use config::{GraphConfig, InitPolicy};
pub use density::{FnDensity, LogDensity, Params};
pub use error::{ImmutableReason, ModelError, Result, UsageError};
pub use graph::{ModelGraph, NodeId, Parent};
pub use init::{InitReport, Initializer};
pub use value::{Shape, Value};
