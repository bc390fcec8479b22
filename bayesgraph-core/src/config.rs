//! Configuration
//!
//! [`GraphConfig`] seeds the graph's random source and sets the default
//! [`InitPolicy`] for every stochastic node. Both deserialize from JSON with
//! every field optional.

use serde::{Deserialize, Serialize};

/// Redraw budget used when a stochastic node starts with an invalid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitPolicy {
    /// Draws of the node itself before escalating to its parents. Also bounds
    /// how often a redrawn parent may retry to reach a valid value of its own.
    pub self_redraws: usize,

    /// Rounds of upstream redraws before giving up.
    pub parent_rounds: usize,

    /// Stochastic layers above the node that may be redrawn. Deterministic
    /// nodes in between are crossed without counting.
    pub upstream_depth: usize,

    /// Emit a warning when a node only initialized after redraws.
    pub warn_on_redraw: bool,
}

impl InitPolicy {
    /// A policy that accepts the initial value or fails.
    pub fn strict() -> Self {
        Self {
            self_redraws: 0,
            parent_rounds: 0,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Upper bound on log-probability evaluations of the node being initialized.
    pub fn max_attempts(&self) -> usize {
        1 + self.self_redraws + self.parent_rounds * (1 + self.self_redraws)
    }
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            self_redraws: 20,
            parent_rounds: 100,
            upstream_depth: 1,
            warn_on_redraw: true,
        }
    }
}

/// Graph-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Seed for the graph's random source. Entropy is used when absent.
    pub seed: Option<u64>,

    /// Default initialization policy for stochastic nodes.
    pub init: InitPolicy,
}

impl GraphConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
