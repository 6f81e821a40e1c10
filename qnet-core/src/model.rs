// SPDX-License-Identifier: Apache-2.0

//! The event dispatcher. `Model` is the only type in this crate that owns
//! the whole node arena, and therefore the only type allowed to make a
//! node's neighbors do anything: every cross-node operation named in the
//! original design (`start_action`, `end_action`, `can_accept_item`,
//! unblocking a blocked predecessor) is a method here, dispatched with a
//! `match` on [`NodeKind`] to the free functions in `factory.rs`,
//! `service.rs`, and `routing.rs`.

use std::collections::HashMap;

use qnet_config::{ConfigError, ModelConfig};

use crate::collections::BoundedCollection;
use crate::error::EngineError;
use crate::factory::{self, FactoryState};
use crate::item::Item;
use crate::logger::{logger_for_verbosity, Evaluation, Logger};
use crate::metrics::{ModelMetrics, NodeMetrics};
use crate::node::{NodeEntry, NodeId, NodeKind, NodeState};
use crate::routing::{self, AcceptCheck, RoutingPolicy, RouterState};
use crate::service::{self, BlockingPolicy, ServiceState};
use crate::task::{Task, TaskIdGen};
use crate::time::approx_eq;

/// A read-only snapshot of [`Model::can_accept_item`] across every node,
/// computed once before a router consults it. Routers need to ask "would
/// this destination take an item right now" without holding a live
/// reference back into the arena they're a part of; snapshotting avoids
/// the aliasing that a closure over `&Model` would otherwise require.
struct AcceptSnapshot(Vec<bool>);

impl AcceptCheck for AcceptSnapshot {
    fn can_accept(&self, node: NodeId) -> bool {
        self.0.get(node).copied().unwrap_or(false)
    }
}

/// Builds a validated [`Model`]. Mirrors the node-by-node assembly style
/// described in the design notes: add nodes, wire them together, then
/// `build()` validates the whole graph at once rather than failing
/// midway through construction.
pub struct ModelBuilder {
    nodes: Vec<NodeEntry>,
    name_to_id: HashMap<String, NodeId>,
    config: ModelConfig,
    evaluations: Vec<Evaluation>,
    pending_seeds: HashMap<NodeId, Vec<Item>>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            name_to_id: HashMap::new(),
            config: ModelConfig::default(),
            evaluations: Vec::new(),
            pending_seeds: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    fn check_name(&self, name: &str) -> Result<(), ConfigError> {
        if self.name_to_id.contains_key(name) {
            Err(ConfigError::DuplicateNodeName(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn push_node(&mut self, name: String, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.name_to_id.insert(name.clone(), id);
        self.nodes.push(NodeEntry::new(name, kind));
        id
    }

    pub fn add_factory(
        &mut self,
        name: impl Into<String>,
        delay: factory::DelayFn,
    ) -> Result<NodeId, ConfigError> {
        let name = name.into();
        self.check_name(&name)?;
        Ok(self.push_node(name, NodeKind::Factory(FactoryState::new(delay))))
    }

    pub fn add_service(
        &mut self,
        name: impl Into<String>,
        max_channels: Option<usize>,
        queue_capacity: Option<usize>,
        delay: service::DelayFn,
    ) -> Result<NodeId, ConfigError> {
        self.add_service_with_blocking(name, max_channels, queue_capacity, delay, BlockingPolicy::default())
    }

    pub fn add_service_with_blocking(
        &mut self,
        name: impl Into<String>,
        max_channels: Option<usize>,
        queue_capacity: Option<usize>,
        delay: service::DelayFn,
        blocking: BlockingPolicy,
    ) -> Result<NodeId, ConfigError> {
        let name = name.into();
        self.check_name(&name)?;
        let state = ServiceState::new(max_channels, queue_capacity, delay).with_blocking(blocking);
        Ok(self.push_node(name, NodeKind::Service(state)))
    }

    pub fn add_router(
        &mut self,
        name: impl Into<String>,
        policy: RoutingPolicy,
    ) -> Result<NodeId, ConfigError> {
        let name = name.into();
        self.check_name(&name)?;
        Ok(self.push_node(name, NodeKind::Router(RouterState::new(policy))))
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), ConfigError> {
        if from >= self.nodes.len() {
            return Err(ConfigError::UnknownNode(format!("#{from}")));
        }
        if to >= self.nodes.len() {
            return Err(ConfigError::UnknownNode(format!("#{to}")));
        }
        self.nodes[from].common.next_node = Some(to);
        self.nodes[to].common.prev_node = Some(from);
        Ok(())
    }

    /// Pre-loads `node` with items already finished-but-blocked, as if a
    /// previous run had left them there. Rejected at `build()` time if
    /// `node` has no `next_node` (invariant 2: a terminal node can never
    /// be blocked).
    pub fn seed_blocked(&mut self, node: NodeId, items: Vec<Item>) {
        self.pending_seeds.entry(node).or_default().extend(items);
    }

    pub fn add_evaluation(&mut self, eval: Evaluation) {
        self.evaluations.push(eval);
    }

    pub fn build(mut self) -> Result<Model, ConfigError> {
        for entry in &self.nodes {
            if let NodeKind::Router(state) = &entry.kind {
                if let Some(sum) = state.policy.probability_sum() {
                    if sum > 1.0 + 1e-9 {
                        return Err(ConfigError::ProbabilityOverflow {
                            node: entry.common.name.clone(),
                            sum,
                        });
                    }
                }
            }
        }

        for (node_id, items) in std::mem::take(&mut self.pending_seeds) {
            if items.is_empty() {
                continue;
            }
            let name = self.nodes[node_id].common.name.clone();
            if self.nodes[node_id].common.next_node.is_none() {
                return Err(ConfigError::TerminalNodeCannotBlock(name));
            }
            let blocked_len = if let NodeKind::Service(state) = &mut self.nodes[node_id].kind {
                for item in items {
                    state.blocked_tasks.push_back(Task {
                        id: 0,
                        item,
                        next_time: 0.0,
                        blocked_start_time: Some(0.0),
                    });
                }
                Some(state.blocked_tasks.len())
            } else {
                None
            };
            if let Some(blocked_len) = blocked_len {
                self.nodes[node_id].common.state = NodeState::Blocked;
                self.nodes[node_id].common.metrics.record_block(blocked_len);
            }
        }

        for id in 0..self.nodes.len() {
            let (has_blocked, next) = match &self.nodes[id].kind {
                NodeKind::Service(s) => (!s.blocked_tasks.is_empty(), self.nodes[id].common.next_node),
                _ => (false, None),
            };
            if has_blocked {
                if let Some(next) = next {
                    self.nodes[next].common.blocked_predecessors.insert(id);
                }
            }
        }

        for entry in &mut self.nodes {
            if let NodeKind::Factory(state) = &mut entry.kind {
                factory::schedule_first_arrival(&mut entry.common, state);
            }
        }

        let logger = logger_for_verbosity(self.config.verbosity);
        Ok(Model {
            nodes: self.nodes,
            name_to_id: self.name_to_id,
            current_time: 0.0,
            task_ids: TaskIdGen::default(),
            metrics: ModelMetrics::default(),
            logger,
            config: self.config,
            evaluations: self.evaluations,
        })
    }
}

pub struct Model {
    nodes: Vec<NodeEntry>,
    name_to_id: HashMap<String, NodeId>,
    current_time: f64,
    task_ids: TaskIdGen,
    metrics: ModelMetrics,
    logger: Box<dyn Logger>,
    config: ModelConfig,
    evaluations: Vec<Evaluation>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("nodes", &self.nodes)
            .field("name_to_id", &self.name_to_id)
            .field("current_time", &self.current_time)
            .field("task_ids", &self.task_ids)
            .field("metrics", &self.metrics)
            .field("config", &self.config)
            .field("evaluations", &self.evaluations)
            .finish_non_exhaustive()
    }
}

impl Model {
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.nodes[id].common.name
    }

    pub fn node_state(&self, id: NodeId) -> NodeState {
        self.nodes[id].common.state
    }

    pub fn node_metrics(&self, id: NodeId) -> &NodeMetrics {
        &self.nodes[id].common.metrics
    }

    pub fn model_metrics(&self) -> &ModelMetrics {
        &self.metrics
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.logger = logger;
    }

    fn node_can_accept(entry: &NodeEntry) -> bool {
        match &entry.kind {
            NodeKind::Factory(_) => false,
            NodeKind::Service(s) => s.can_accept(),
            NodeKind::Router(_) => true,
        }
    }

    pub fn can_accept_item(&self, id: NodeId) -> bool {
        Self::node_can_accept(&self.nodes[id])
    }

    fn accept_snapshot(&self) -> AcceptSnapshot {
        AcceptSnapshot(self.nodes.iter().map(Self::node_can_accept).collect())
    }

    /// Hands `item` to node `id`. Factories can never be on the receiving
    /// end of this call (they only emit, via `end_action`); everything
    /// else routes through here, including zero-time router chaining and
    /// unblock delivery.
    pub fn start_action(&mut self, id: NodeId, item: Item) -> Result<(), EngineError> {
        self.nodes[id].common.current_time = self.current_time;
        match &self.nodes[id].kind {
            NodeKind::Factory(_) => return Err(EngineError::FactoryCannotReceive(id)),
            NodeKind::Service(_) => {
                let entry = &mut self.nodes[id];
                let NodeKind::Service(state) = &mut entry.kind else {
                    unreachable!()
                };
                service::admit(&mut entry.common, state, item, &mut self.task_ids);
                service::check_invariants(&entry.common, state);
            }
            NodeKind::Router(_) => {
                let accept = self.accept_snapshot();
                let entry = &mut self.nodes[id];
                let NodeKind::Router(state) = &mut entry.kind else {
                    unreachable!()
                };
                routing::start_action(&mut entry.common, state, item, &accept);
            }
        }
        if self.config.verbosity.logs_state() {
            self.log_node_state(id);
        }
        Ok(())
    }

    fn deliver_or_finish(&mut self, from: NodeId, mut item: Item) -> Result<(), EngineError> {
        match self.nodes[from].common.next_node {
            Some(next) => self.start_action(next, item),
            None => {
                item.mark_processed();
                Ok(())
            }
        }
    }

    pub fn end_action(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.nodes[id].common.current_time = self.current_time;
        match &self.nodes[id].kind {
            NodeKind::Factory(_) => self.end_action_factory(id),
            NodeKind::Service(_) => self.end_action_service(id),
            NodeKind::Router(_) => self.end_action_router(id),
        }
    }

    fn end_action_factory(&mut self, id: NodeId) -> Result<(), EngineError> {
        let item = {
            let entry = &mut self.nodes[id];
            let NodeKind::Factory(state) = &mut entry.kind else {
                unreachable!()
            };
            factory::end_action(&mut entry.common, state)
        };
        self.deliver_or_finish(id, item)
    }

    fn end_action_router(&mut self, id: NodeId) -> Result<(), EngineError> {
        let delivered = {
            let entry = &mut self.nodes[id];
            let NodeKind::Router(state) = &mut entry.kind else {
                unreachable!()
            };
            routing::end_action(&mut entry.common, state)
        };
        for (mut item, dest) in delivered {
            match dest {
                Some(next) => self.start_action(next, item)?,
                None => item.mark_processed(),
            }
        }
        Ok(())
    }

    fn end_action_service(&mut self, id: NodeId) -> Result<(), EngineError> {
        let finished_item = {
            let entry = &mut self.nodes[id];
            let NodeKind::Service(state) = &mut entry.kind else {
                unreachable!()
            };
            service::complete_earliest(state)
        };

        let next_node = self.nodes[id].common.next_node;
        let downstream_accepts = next_node.map(|n| self.can_accept_item(n)).unwrap_or(true);

        let will_block = {
            let entry = &mut self.nodes[id];
            let NodeKind::Service(state) = &mut entry.kind else {
                unreachable!()
            };
            service::should_block(&entry.common, state, downstream_accepts)
        };

        if will_block {
            {
                let entry = &mut self.nodes[id];
                let NodeKind::Service(state) = &mut entry.kind else {
                    unreachable!()
                };
                service::block(&mut entry.common, state, finished_item);
                service::refill(&mut entry.common, state, &mut self.task_ids);
                service::recompute_next_time(&mut entry.common, state);
                service::check_invariants(&entry.common, state);
            }
            let next = next_node.expect("should_block only returns true when a next_node exists");
            self.nodes[next].common.blocked_predecessors.insert(id);
            if self.config.verbosity.logs_state() {
                self.log_node_state(id);
            }
            Ok(())
        } else {
            let departed = {
                let entry = &mut self.nodes[id];
                let NodeKind::Service(state) = &mut entry.kind else {
                    unreachable!()
                };
                let departed = service::depart(&mut entry.common, state, finished_item);
                service::refill(&mut entry.common, state, &mut self.task_ids);
                service::recompute_next_time(&mut entry.common, state);
                service::check_invariants(&entry.common, state);
                departed
            };
            self.deliver_or_finish(id, departed)?;
            self.try_unblock_predecessors(id)?;
            if self.config.verbosity.logs_state() {
                self.log_node_state(id);
            }
            Ok(())
        }
    }

    /// The hook-driven half of unblocking (§4.7): whenever `id`'s capacity
    /// may have changed, give its blocked predecessors a chance to push
    /// their held item through, FIFO within each predecessor, round-robin
    /// across predecessors. Returns whether anything was delivered, so
    /// [`Self::run_unblock_safety_net`] knows whether a sweep made
    /// progress.
    fn try_unblock_predecessors(&mut self, id: NodeId) -> Result<bool, EngineError> {
        let mut any_progress = false;
        loop {
            if !self.can_accept_item(id) {
                break;
            }
            let preds: Vec<NodeId> = self.nodes[id].common.blocked_predecessors.iter().copied().collect();
            let mut progressed_this_pass = false;
            for p in preds {
                if !self.can_accept_item(id) {
                    break;
                }
                let popped = {
                    let entry = &mut self.nodes[p];
                    let NodeKind::Service(state) = &mut entry.kind else {
                        continue;
                    };
                    let item = service::pop_blocked_head(&mut entry.common, state);
                    if item.is_some() {
                        service::settle_state_after_unblock(&mut entry.common, state);
                    }
                    item
                };
                if let Some(item) = popped {
                    progressed_this_pass = true;
                    any_progress = true;
                    self.start_action(id, item)?;
                    let p_empty = matches!(&self.nodes[p].kind, NodeKind::Service(s) if s.blocked_tasks.is_empty());
                    if p_empty {
                        self.nodes[id].common.blocked_predecessors.remove(&p);
                    }
                    if self.config.verbosity.logs_state() {
                        self.log_node_state(p);
                    }
                }
            }
            if !progressed_this_pass {
                break;
            }
        }
        Ok(any_progress)
    }

    /// Extra fixed-point sweep over every node, for cascades longer than
    /// one hop that the direct hook in `end_action_service` doesn't reach
    /// on its own (e.g. A blocked on B blocked on C: freeing C's capacity
    /// only retriggers B's hook, not A's). Bounded at `2 * node_count()`
    /// passes; gated by `ModelConfig::enable_unblock_safety_net`.
    fn run_unblock_safety_net(&mut self) -> Result<(), EngineError> {
        if !self.config.enable_unblock_safety_net {
            return Ok(());
        }
        let bound = 2 * self.nodes.len().max(1);
        for _ in 0..bound {
            let mut progressed = false;
            for id in 0..self.nodes.len() {
                if self.try_unblock_predecessors(id)? {
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(());
            }
            self.metrics.num_unblock_cycles += 1;
        }
        tracing::warn!(bound, "unblock safety net did not reach a fixed point");
        Ok(())
    }

    fn earliest_next_time(&self) -> Option<f64> {
        self.nodes
            .iter()
            .map(|e| e.common.next_time)
            .filter(|t| t.is_finite())
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.min(t))))
    }

    fn advance_all(&mut self, dt: f64, t: f64) {
        if dt <= 0.0 {
            return;
        }
        for entry in &mut self.nodes {
            entry.common.current_time = t;
            if let NodeKind::Service(state) = &mut entry.kind {
                let deltas = state.channel_pool.advance_time(dt, t);
                entry.common.metrics.integrate_time(dt, state.queue.len(), &deltas);
                for item in state.queue.iter_mut() {
                    item.advance_time(t);
                }
                for task in state.blocked_tasks.iter_mut() {
                    task.item.advance_time(t);
                }
            }
        }
        self.metrics.passed_time += dt;
    }

    fn fire_due_events(&mut self) -> Result<(), EngineError> {
        loop {
            let due = self
                .nodes
                .iter()
                .position(|e| approx_eq(e.common.next_time, self.current_time));
            match due {
                Some(id) => self.end_action(id)?,
                None => break,
            }
        }
        Ok(())
    }

    fn log_node_state(&self, id: NodeId) {
        let entry = &self.nodes[id];
        self.logger.node_state(&entry.common.name, self.current_time, entry.common.state);
    }

    /// Advances to the next scheduled event, at or before `end_time`, and
    /// fires every node due at that instant. Returns `false` once nothing
    /// is left to do before `end_time` (used by [`Self::simulate`] as the
    /// loop condition).
    pub fn step(&mut self, end_time: f64) -> Result<bool, EngineError> {
        let Some(t) = self.earliest_next_time() else {
            return Ok(false);
        };
        if t > end_time {
            return Ok(false);
        }
        let dt = t - self.current_time;
        self.advance_all(dt, t);
        self.current_time = t;
        self.fire_due_events()?;
        self.run_unblock_safety_net()?;
        Ok(true)
    }

    pub fn simulate(&mut self, end_time: f64) -> Result<(), EngineError> {
        if end_time <= self.current_time {
            return Err(EngineError::EndTimeNotInFuture(end_time, self.current_time));
        }
        while self.step(end_time)? {}
        let dt = end_time - self.current_time;
        if dt > 0.0 {
            self.advance_all(dt, end_time);
            self.current_time = end_time;
        }
        if self.config.verbosity.logs_metrics() {
            self.logger.model_metrics(self.current_time, &self.metrics);
            for entry in &self.nodes {
                self.logger
                    .node_metrics(&entry.common.name, self.current_time, &entry.common.metrics);
            }
            for eval in &self.evaluations {
                let value = eval.evaluate(self);
                self.logger.evaluation_report(&eval.name, value);
            }
        }
        Ok(())
    }

    /// Restores every node to its just-built state and rewinds the clock,
    /// so the same `Model` can be replayed deterministically (the
    /// determinism law in the testable-properties section: same
    /// construction plus same delay/rng sequences implies the same run).
    pub fn reset(&mut self) {
        self.current_time = 0.0;
        self.task_ids.reset();
        self.metrics.reset();
        for entry in &mut self.nodes {
            entry.common.reset();
            match &mut entry.kind {
                NodeKind::Factory(state) => state.reset(),
                NodeKind::Service(state) => state.reset(),
                NodeKind::Router(state) => state.reset(),
            }
        }
        for entry in &mut self.nodes {
            if let NodeKind::Factory(state) = &mut entry.kind {
                factory::schedule_first_arrival(&mut entry.common, state);
            }
        }
    }
}
