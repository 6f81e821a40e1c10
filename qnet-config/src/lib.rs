// SPDX-License-Identifier: Apache-2.0

//! Configuration surface for the `qnet-core` discrete-event engine.
//!
//! This crate is kept separate from `qnet-core` the same way the engine's
//! neighboring crates split config from runtime logic: nothing here owns an
//! event loop or mutates simulation state, it only describes *how* a run
//! should be configured and validates that description before the engine
//! ever sees it.

use thiserror::Error;

/// How much detail [`qnet_core`]'s `Model::simulate` logs per step.
///
/// `State` and `Metrics` can be combined; `bitflags`-style composition is
/// deliberately avoided here since there are only four meaningful
/// combinations and an enum keeps call sites exhaustive-matchable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    None,
    State,
    Metrics,
    StateAndMetrics,
}

impl Verbosity {
    pub fn logs_state(self) -> bool {
        matches!(self, Verbosity::State | Verbosity::StateAndMetrics)
    }

    pub fn logs_metrics(self) -> bool {
        matches!(self, Verbosity::Metrics | Verbosity::StateAndMetrics)
    }
}

/// Tie-break discipline for [`qnet_core::collections::PriorityQueue`].
///
/// The mode is baked into each entry's comparison key at push time (see
/// `PriorityQueue::push`), never branched on at compare time, so the queue
/// stays a single monomorphic `BinaryHeap` regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Smaller arrival sequence number wins: equal-priority entries pop in
    /// the order they were pushed.
    #[default]
    Fifo,
    /// Larger arrival sequence number wins: equal-priority entries pop in
    /// reverse of push order.
    Lifo,
    /// No ordering guarantee among equal-priority entries.
    None,
}

/// Run-level knobs that are not per-node (per-node knobs like `max_channels`
/// or `queue_capacity` live on the node builders in `qnet-core`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    pub verbosity: Verbosity,
    /// When false, `Model::step` skips the unblock safety net pass (§4.7).
    /// Hook-driven unblock (the `try_unblock` call already embedded in
    /// `end_action`) still runs; only the extra fixed-point sweep is
    /// skipped, which is faster but can leave upstream nodes blocked for an
    /// extra step on chains longer than one hop.
    pub enable_unblock_safety_net: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::None,
            enable_unblock_safety_net: true,
        }
    }
}

/// Errors detected while assembling a node graph, before any simulated time
/// elapses. These are programmer errors: a caller can always avoid them by
/// constructing the graph correctly, so they are returned from `build()`
/// rather than discovered mid-run.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("duplicate node name: {0:?}")]
    DuplicateNodeName(String),

    #[error("node {node:?}: probabilistic transition weights sum to {sum}, which exceeds 1")]
    ProbabilityOverflow { node: String, sum: f64 },

    #[error("node {0:?}: terminal node (no next_node) cannot be configured with initial blocked tasks")]
    TerminalNodeCannotBlock(String),

    #[error("node {0:?}: referenced as a routing/forwarding target but was never added to the graph")]
    UnknownNode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_predicates() {
        assert!(!Verbosity::None.logs_state());
        assert!(!Verbosity::None.logs_metrics());
        assert!(Verbosity::State.logs_state());
        assert!(!Verbosity::State.logs_metrics());
        assert!(Verbosity::Metrics.logs_metrics());
        assert!(!Verbosity::Metrics.logs_state());
        assert!(Verbosity::StateAndMetrics.logs_state());
        assert!(Verbosity::StateAndMetrics.logs_metrics());
    }

    #[test]
    fn default_model_config_enables_safety_net() {
        let cfg = ModelConfig::default();
        assert!(cfg.enable_unblock_safety_net);
        assert_eq!(cfg.verbosity, Verbosity::None);
    }
}
