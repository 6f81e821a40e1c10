// SPDX-License-Identifier: Apache-2.0

//! The multi-server service node: channel pool, waiting queue, and the
//! blocking discipline that holds completed items when downstream
//! capacity is exhausted.
//!
//! This module only implements single-node mechanics — admission,
//! completion, blocking, refill — as plain functions over
//! [`NodeCommon`]/[`ServiceState`]. Anything that needs to reach a
//! neighbor (querying `can_accept_item`, handing an item off, registering
//! in `blocked_predecessors`) is choreographed by
//! [`crate::model::Model`], which is the only place that holds the whole
//! graph.

use std::collections::VecDeque;

use crate::channel_pool::ChannelPool;
use crate::collections::{BoundedCollection, FifoQueue};
use crate::item::Item;
use crate::metrics::NodeMetrics;
use crate::node::NodeCommon;
use crate::task::{Task, TaskIdGen};

pub type DelayFn = Box<dyn FnMut(&Item) -> f64>;

/// Library helpers named in the original design notes, plus a `Custom`
/// escape hatch. `OnCapacity` is the default and is evaluated specially by
/// `Model` (it needs to query the downstream node's `can_accept_item`,
/// which this module has no access to).
pub enum BlockingPolicy {
    OnCapacity,
    Custom(Box<dyn FnMut() -> bool>),
    OnQueueLength(usize),
    InTimeWindow { start: f64, end: f64 },
    OnLoadThreshold(f64),
}

impl Default for BlockingPolicy {
    fn default() -> Self {
        BlockingPolicy::OnCapacity
    }
}

impl BlockingPolicy {
    pub fn on_capacity() -> Self {
        BlockingPolicy::OnCapacity
    }

    pub fn on_queue_length(k: usize) -> Self {
        BlockingPolicy::OnQueueLength(k)
    }

    pub fn in_time_window(start: f64, end: f64) -> Self {
        BlockingPolicy::InTimeWindow { start, end }
    }

    pub fn on_load_threshold(theta: f64) -> Self {
        BlockingPolicy::OnLoadThreshold(theta)
    }

    /// `downstream_accepts` is only consulted by `OnCapacity` and, outside
    /// its window, by `InTimeWindow`; the other variants never look past
    /// this node's own state.
    fn evaluate(
        &mut self,
        metrics: &NodeMetrics,
        current_time: f64,
        queue_len: usize,
        downstream_accepts: bool,
    ) -> bool {
        match self {
            BlockingPolicy::OnCapacity => !downstream_accepts,
            BlockingPolicy::Custom(f) => f(),
            BlockingPolicy::OnQueueLength(k) => queue_len >= *k,
            BlockingPolicy::InTimeWindow { start, end } => {
                if current_time >= *start && current_time < *end {
                    true
                } else {
                    !downstream_accepts
                }
            }
            BlockingPolicy::OnLoadThreshold(theta) => metrics.mean_channels_load() >= *theta,
        }
    }
}

impl std::fmt::Debug for BlockingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingPolicy::OnCapacity => write!(f, "OnCapacity"),
            BlockingPolicy::Custom(_) => write!(f, "Custom(..)"),
            BlockingPolicy::OnQueueLength(k) => write!(f, "OnQueueLength({k})"),
            BlockingPolicy::InTimeWindow { start, end } => {
                write!(f, "InTimeWindow({start}, {end})")
            }
            BlockingPolicy::OnLoadThreshold(t) => write!(f, "OnLoadThreshold({t})"),
        }
    }
}

pub struct ServiceState {
    pub queue: FifoQueue<Item>,
    pub channel_pool: ChannelPool,
    pub blocked_tasks: VecDeque<Task>,
    pub delay: DelayFn,
    pub blocking: BlockingPolicy,
}

impl std::fmt::Debug for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceState")
            .field("queue_len", &self.queue.len())
            .field("channel_pool", &self.channel_pool)
            .field("blocked_tasks", &self.blocked_tasks.len())
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    ChannelOccupied,
    Queued,
    Lost,
}

impl ServiceState {
    pub fn new(max_channels: Option<usize>, queue_capacity: Option<usize>, delay: DelayFn) -> Self {
        Self {
            queue: FifoQueue::new(queue_capacity),
            channel_pool: ChannelPool::new(max_channels),
            blocked_tasks: VecDeque::new(),
            delay,
            blocking: BlockingPolicy::default(),
        }
    }

    pub fn with_blocking(mut self, policy: BlockingPolicy) -> Self {
        self.blocking = policy;
        self
    }

    /// Effective occupancy: occupied channels plus held-but-blocked tasks.
    pub fn effective_occupancy(&self) -> usize {
        self.channel_pool.occupied_count() + self.blocked_tasks.len()
    }

    pub fn has_room_for_channel(&self) -> bool {
        match self.channel_pool.max_channels() {
            None => true,
            Some(max) => self.effective_occupancy() < max,
        }
    }

    /// Default `can_accept_item`: room for another channel, or room in the
    /// waiting queue.
    pub fn can_accept(&self) -> bool {
        self.has_room_for_channel() || !self.queue.is_full()
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.channel_pool.reset();
        self.blocked_tasks.clear();
    }
}

/// Admits `item` per invariant 5: a free channel if there's effective
/// room, else the waiting queue, else loss.
pub fn admit(common: &mut NodeCommon, state: &mut ServiceState, mut item: Item, task_ids: &mut TaskIdGen) -> AdmissionOutcome {
    item.record_in(&common.name, common.current_time);
    common.metrics.record_in(common.current_time);

    if state.has_room_for_channel() {
        let delay = (state.delay)(&item);
        debug_assert!(delay >= 0.0, "delay function returned a negative delay");
        let task = Task::new(task_ids.next(), item, common.current_time + delay);
        state.channel_pool.occupy(task);
        if common.state != crate::node::NodeState::Blocked {
            common.state = crate::node::NodeState::Busy;
        }
        common.next_time = state.channel_pool.next_completion_time();
        AdmissionOutcome::ChannelOccupied
    } else if !state.queue.is_full() {
        state.queue.push(item).expect("just checked not full");
        AdmissionOutcome::Queued
    } else {
        common.metrics.record_failure();
        AdmissionOutcome::Lost
    }
}

/// Pops the earliest-completing task. Does not yet decide whether it
/// blocks or departs; that decision needs the downstream's
/// `can_accept_item`, which only `Model` can answer.
pub fn complete_earliest(state: &mut ServiceState) -> Item {
    state
        .channel_pool
        .complete_earliest()
        .expect("end_action called with no active tasks")
        .item
}

/// Moves `item` into `blocked_tasks`, transitioning to `Blocked`.
/// `blocked_predecessors` registration on the downstream node is the
/// caller's responsibility.
pub fn block(common: &mut NodeCommon, state: &mut ServiceState, item: Item) {
    let task = Task {
        id: 0,
        item,
        next_time: common.current_time,
        blocked_start_time: Some(common.current_time),
    };
    state.blocked_tasks.push_back(task);
    common.state = crate::node::NodeState::Blocked;
    common
        .metrics
        .record_block(state.blocked_tasks.len());
}

/// Decides whether a just-finished item should block, given whatever the
/// downstream node currently reports for `can_accept_item`. A missing
/// `next_node` always means "don't block", regardless of policy.
pub fn should_block(
    common: &NodeCommon,
    state: &mut ServiceState,
    downstream_accepts: bool,
) -> bool {
    if common.next_node.is_none() {
        return false;
    }
    state
        .blocking
        .evaluate(&common.metrics, common.current_time, state.queue.len(), downstream_accepts)
}

/// Finalizes a departing item's OUT hook and updates `state` to `Idle` if
/// nothing remains active, `Busy` otherwise. Used both for a normal
/// completion and for a delivery popped out of `blocked_tasks`.
pub fn depart(common: &mut NodeCommon, state: &ServiceState, mut item: Item) -> Item {
    item.record_out(&common.name, common.current_time);
    common.metrics.record_out(common.current_time);
    if common.state != crate::node::NodeState::Blocked {
        common.state = if state.channel_pool.is_empty() {
            crate::node::NodeState::Idle
        } else {
            crate::node::NodeState::Busy
        };
    }
    item
}

/// Pops the head of `blocked_tasks` (FIFO) and records its blocking
/// duration. Returns `None` if nothing is blocked.
pub fn pop_blocked_head(common: &mut NodeCommon, state: &mut ServiceState) -> Option<Item> {
    let task = state.blocked_tasks.pop_front()?;
    let started = task
        .blocked_start_time
        .expect("blocked task always has a blocked_start_time");
    common.metrics.record_unblock(started, common.current_time);
    Some(task.item)
}

/// After `blocked_tasks` changes (unblock or a brand-new block), restores
/// the `Busy`/`Idle` split for a node that is no longer `Blocked`. No-op
/// while still `Blocked`.
pub fn settle_state_after_unblock(common: &mut NodeCommon, state: &ServiceState) {
    if state.blocked_tasks.is_empty() {
        common.state = if state.channel_pool.is_empty() {
            crate::node::NodeState::Idle
        } else {
            crate::node::NodeState::Busy
        };
    }
}

/// Pulls one waiting item into a free channel, if any room and any
/// waiting item exist. Leaves `Blocked` nodes `Blocked`.
pub fn refill(common: &mut NodeCommon, state: &mut ServiceState, task_ids: &mut TaskIdGen) {
    if !state.has_room_for_channel() {
        return;
    }
    let Ok(item) = state.queue.pop() else {
        return;
    };
    let delay = (state.delay)(&item);
    debug_assert!(delay >= 0.0, "delay function returned a negative delay");
    let task = Task::new(task_ids.next(), item, common.current_time + delay);
    state.channel_pool.occupy(task);
    if common.state != crate::node::NodeState::Blocked {
        common.state = crate::node::NodeState::Busy;
    }
}

pub fn recompute_next_time(common: &mut NodeCommon, state: &ServiceState) {
    common.next_time = state.channel_pool.next_completion_time();
}

/// Debug-only invariant checks (spec §3 invariants 1-6). Compiled out in
/// release builds.
pub fn check_invariants(common: &NodeCommon, state: &ServiceState) {
    debug_assert_eq!(
        common.state == crate::node::NodeState::Blocked,
        !state.blocked_tasks.is_empty(),
        "invariant 1: state=Blocked iff blocked_tasks is nonempty"
    );
    if !state.blocked_tasks.is_empty() {
        debug_assert!(common.next_node.is_some(), "invariant 2: blocked node must have a next_node");
    }
    if common.state == crate::node::NodeState::Idle {
        debug_assert!(
            state.channel_pool.is_empty() && state.blocked_tasks.is_empty(),
            "invariant 3: Idle implies empty channel pool and no blocked tasks"
        );
    }
    if let Some(max) = state.channel_pool.max_channels() {
        debug_assert!(
            state.effective_occupancy() <= max,
            "invariant 5: effective occupancy must not exceed max_channels"
        );
    }
}
