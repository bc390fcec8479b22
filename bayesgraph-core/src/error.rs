//! Error Types
//!
//! Every fallible operation in the crate returns [`ModelError`]. Usage errors
//! (API misuse detected while declaring or evaluating a node) are grouped under
//! [`UsageError`] so callers can match on the whole family at once.
//!
//! Transient invalid draws during initialization are not errors. They are
//! retried internally and only surface as [`ModelError::InvalidInitialization`]
//! once the redraw budget is exhausted.

use std::fmt;

use thiserror::Error;

use crate::graph::NodeId;

/// Why a value could not be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmutableReason {
    /// The node holds observed data.
    Observed,
    /// The node's value is derived from its parents.
    Deterministic,
}

impl fmt::Display for ImmutableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImmutableReason::Observed => write!(f, "it is observed"),
            ImmutableReason::Deterministic => write!(f, "it is deterministic"),
        }
    }
}

/// Errors raised by the node/graph core.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The caller misused the API surface.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Adding an edge would make a node its own ancestor.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CyclicGraph {
        /// Node names forming the cycle, first and last entries equal.
        path: Vec<String>,
    },

    /// Attempt to overwrite the value of an observed or deterministic node.
    #[error("cannot set the value of `{node}` because {reason}")]
    ImmutableValue { node: String, reason: ImmutableReason },

    /// The initializer could not find a configuration with finite log-probability.
    #[error("could not initialize `{node}` with a finite log-probability after {attempts} attempts")]
    InvalidInitialization { node: String, attempts: usize },

    /// The id does not belong to this graph.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),
}

/// API misuse detected while declaring or evaluating a node.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    #[error("`{parameter}` is not a parameter of {density} (node `{node}`); expected one of: {}", expected.join(", "))]
    UnknownParameter {
        node: String,
        density: String,
        parameter: String,
        expected: Vec<String>,
    },

    #[error("node `{node}` is missing parameter `{parameter}` required by {density}")]
    MissingParameter {
        node: String,
        density: String,
        parameter: String,
    },

    /// A density or compute function read a parameter the node never bound.
    /// The graph reports it as [`UsageError::MissingParameter`] once the node
    /// is known.
    #[error("parameter `{parameter}` is not bound")]
    UnboundParameter { parameter: String },

    #[error("parameter `{parameter}` must be {expected}")]
    ParameterType {
        parameter: String,
        expected: &'static str,
    },

    #[error("value must be {expected}")]
    ValueType { expected: &'static str },

    #[error("a node named `{0}` already exists")]
    DuplicateName(String),

    #[error("node `{node}` refers to unknown parent `{parent}`")]
    DanglingParent { node: String, parent: String },

    #[error("node `{node}` has no sampler and cannot be redrawn")]
    NotSampleable { node: String },

    #[error("node `{node}` needs an initial value")]
    MissingValue { node: String },

    #[error("node `{node}` is not stochastic and has no log-probability")]
    NotStochastic { node: String },

    #[error("deterministic function failed: {0}")]
    Compute(String),
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = ModelError::CyclicGraph {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn usage_error_converts() {
        let err: ModelError = UsageError::DuplicateName("x".into()).into();
        assert!(matches!(err, ModelError::Usage(UsageError::DuplicateName(_))));
        assert_eq!(err.to_string(), "a node named `x` already exists");
    }

    #[test]
    fn missing_parameter_names_node() {
        let err = UsageError::MissingParameter {
            node: "alpha".into(),
            density: "Normal".into(),
            parameter: "tau".into(),
        };
        assert_eq!(
            err.to_string(),
            "node `alpha` is missing parameter `tau` required by Normal"
        );
    }
}
