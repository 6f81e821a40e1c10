// SPDX-License-Identifier: Apache-2.0

//! Zero-simulated-time routing nodes: direct, probabilistic, and
//! grouped-priority transitions.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::item::Item;
use crate::node::{NodeCommon, NodeId};

/// A destination selector. `accept` lets [`RoutingPolicy::PriorityGroup`]
/// consult downstream capacity without the router owning a reference to
/// the rest of the graph; `crate::model::Model` is the only caller that
/// can actually answer it.
pub trait AcceptCheck {
    fn can_accept(&self, node: NodeId) -> bool;
}

impl<F: Fn(NodeId) -> bool> AcceptCheck for F {
    fn can_accept(&self, node: NodeId) -> bool {
        self(node)
    }
}

pub enum RoutingPolicy {
    Direct(Box<dyn Fn(&Item) -> Option<NodeId>>),
    /// Entries sum to at most 1; the implicit remainder routes to `None`
    /// ("leave the system"). Validated at `ModelBuilder::build` time. The
    /// `seed` is kept alongside the live `rng` purely so `reset()` can
    /// recreate it; nothing else reads `seed`.
    Probabilistic {
        weights: Vec<(Option<NodeId>, f64)>,
        rng: StdRng,
        seed: u64,
    },
    /// Ascending priority scan (lower key = higher priority): pick
    /// uniformly among accepting destinations at the first nonempty
    /// level. If every destination everywhere refuses, fall back to a
    /// uniform pick from the *highest*-priority level, to push
    /// backpressure toward the most desirable resource.
    PriorityGroup {
        levels: BTreeMap<u32, Vec<NodeId>>,
        rng: StdRng,
        seed: u64,
    },
}

impl std::fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingPolicy::Direct(_) => f.write_str("RoutingPolicy::Direct(..)"),
            RoutingPolicy::Probabilistic { weights, .. } => f
                .debug_struct("RoutingPolicy::Probabilistic")
                .field("weights", weights)
                .finish(),
            RoutingPolicy::PriorityGroup { levels, .. } => f
                .debug_struct("RoutingPolicy::PriorityGroup")
                .field("levels", levels)
                .finish(),
        }
    }
}

impl RoutingPolicy {
    pub fn probabilistic(weights: Vec<(Option<NodeId>, f64)>, seed: u64) -> Self {
        RoutingPolicy::Probabilistic {
            weights,
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn priority_group(levels: BTreeMap<u32, Vec<NodeId>>, seed: u64) -> Self {
        RoutingPolicy::PriorityGroup {
            levels,
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn select(&mut self, item: &Item, accept: &dyn AcceptCheck) -> Option<NodeId> {
        match self {
            RoutingPolicy::Direct(f) => f(item),
            RoutingPolicy::Probabilistic { weights, rng, .. } => {
                let roll: f64 = rng.gen_range(0.0..1.0);
                let mut cum = 0.0;
                for (dest, weight) in weights.iter() {
                    cum += weight;
                    if roll < cum {
                        return *dest;
                    }
                }
                None
            }
            RoutingPolicy::PriorityGroup { levels, rng, .. } => {
                for destinations in levels.values() {
                    let acceptors: Vec<NodeId> = destinations
                        .iter()
                        .copied()
                        .filter(|&d| accept.can_accept(d))
                        .collect();
                    if !acceptors.is_empty() {
                        let idx = rng.gen_range(0..acceptors.len());
                        return Some(acceptors[idx]);
                    }
                }
                let highest_priority = levels.values().next()?;
                if highest_priority.is_empty() {
                    return None;
                }
                let idx = rng.gen_range(0..highest_priority.len());
                Some(highest_priority[idx])
            }
        }
    }

    /// Sum of weights, for construction-time validation. Only meaningful
    /// for `Probabilistic`.
    pub fn probability_sum(&self) -> Option<f64> {
        match self {
            RoutingPolicy::Probabilistic { weights, .. } => {
                Some(weights.iter().map(|(_, w)| w).sum())
            }
            _ => None,
        }
    }

    /// Recreates the rng from its original seed, so a reset model replays
    /// routing decisions identically. No-op for `Direct`, whose closure is
    /// the caller's own determinism problem.
    pub fn reset_rng(&mut self) {
        match self {
            RoutingPolicy::Direct(_) => {}
            RoutingPolicy::Probabilistic { rng, seed, .. } => *rng = StdRng::seed_from_u64(*seed),
            RoutingPolicy::PriorityGroup { rng, seed, .. } => *rng = StdRng::seed_from_u64(*seed),
        }
    }
}

#[derive(Debug)]
pub struct RouterState {
    pub policy: RoutingPolicy,
    /// Items that have been selected-but-not-yet-delivered. Zero-time
    /// routing still needs a step boundary between `start_action` (select)
    /// and `end_action` (deliver), to avoid unbounded same-step recursion
    /// when routers feed each other.
    pending: VecDeque<(Item, Option<NodeId>)>,
}

impl RouterState {
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            pending: VecDeque::new(),
        }
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.policy.reset_rng();
    }
}

/// Records IN, selects a destination immediately, and queues the
/// (item, destination) pair for delivery at the node's own `end_action`
/// (scheduled for the current instant).
pub fn start_action(
    common: &mut NodeCommon,
    state: &mut RouterState,
    mut item: Item,
    accept: &dyn AcceptCheck,
) {
    item.record_in(&common.name, common.current_time);
    common.metrics.record_in(common.current_time);
    let dest = state.policy.select(&item, accept);
    state.pending.push_back((item, dest));
    common.next_time = common.current_time;
}

/// Drains every pending (item, destination) pair queued at the current
/// instant. The caller (`Model::end_action`) is responsible for the
/// actual handoff to `destination` (or marking the item processed).
pub fn end_action(common: &mut NodeCommon, state: &mut RouterState) -> Vec<(Item, Option<NodeId>)> {
    let mut delivered = Vec::with_capacity(state.pending.len());
    for (mut item, dest) in state.pending.drain(..) {
        item.record_out(&common.name, common.current_time);
        common.metrics.record_out(common.current_time);
        delivered.push((item, dest));
    }
    common.next_time = f64::INFINITY;
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always_accept(_: NodeId) -> bool {
        true
    }

    fn never_accept(_: NodeId) -> bool {
        false
    }

    #[test]
    fn direct_transition_is_a_pure_function_of_the_item() {
        let mut policy = RoutingPolicy::Direct(Box::new(|item: &Item| {
            if item.id().ends_with("_0") {
                Some(1)
            } else {
                Some(2)
            }
        }));
        let item = Item::new("a_0", 0.0);
        assert_eq!(policy.select(&item, &always_accept), Some(1));
    }

    #[test]
    fn probabilistic_transition_respects_weights_deterministically() {
        let mut policy = RoutingPolicy::probabilistic(vec![(Some(1), 1.0)], 42);
        let item = Item::new("x", 0.0);
        // Weight 1.0 always selects the only destination.
        for _ in 0..20 {
            assert_eq!(policy.select(&item, &always_accept), Some(1));
        }
    }

    #[test]
    fn probabilistic_transition_remainder_leaves_the_system() {
        let mut policy = RoutingPolicy::probabilistic(vec![(Some(1), 0.0)], 7);
        let item = Item::new("x", 0.0);
        for _ in 0..20 {
            assert_eq!(policy.select(&item, &always_accept), None);
        }
    }

    #[test]
    fn priority_group_picks_first_nonempty_level() {
        let mut levels = BTreeMap::new();
        levels.insert(1, vec![10]);
        levels.insert(10, vec![20]);
        let mut policy = RoutingPolicy::priority_group(levels, 1);
        let item = Item::new("x", 0.0);
        assert_eq!(policy.select(&item, &always_accept), Some(10));
    }

    #[test]
    fn priority_group_with_gaps_skips_full_levels() {
        // Spec scenario 5: priorities {1, 10, 100}, 1 and 10 full, 100 free.
        let mut levels = BTreeMap::new();
        levels.insert(1, vec![101]);
        levels.insert(10, vec![110]);
        levels.insert(100, vec![1100]);
        let mut policy = RoutingPolicy::priority_group(levels, 2);
        let item = Item::new("x", 0.0);
        let accept = |n: NodeId| n == 1100;
        assert_eq!(policy.select(&item, &accept), Some(1100));
    }

    #[test]
    fn priority_group_total_refusal_falls_back_to_highest_priority_level() {
        let mut levels = BTreeMap::new();
        levels.insert(1, vec![101, 102]);
        levels.insert(10, vec![110]);
        let mut policy = RoutingPolicy::priority_group(levels, 3);
        let item = Item::new("x", 0.0);
        let selected = policy.select(&item, &never_accept).unwrap();
        assert!([101, 102].contains(&selected));
    }

    #[test]
    fn priority_group_empty_configuration_returns_none() {
        let mut policy = RoutingPolicy::priority_group(BTreeMap::new(), 4);
        let item = Item::new("x", 0.0);
        assert_eq!(policy.select(&item, &always_accept), None);
    }

    #[test]
    fn router_defers_delivery_to_the_next_step_boundary() {
        let mut common = NodeCommon::new("router_a");
        common.current_time = 5.0;
        let mut state = RouterState::new(RoutingPolicy::Direct(Box::new(|_| Some(1))));
        start_action(&mut common, &mut state, Item::new("x", 5.0), &always_accept);
        assert_eq!(common.next_time, 5.0);
        let delivered = end_action(&mut common, &mut state);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, Some(1));
        assert_eq!(common.next_time, f64::INFINITY);
    }
}
