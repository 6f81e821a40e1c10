// SPDX-License-Identifier: Apache-2.0

//! Common node state shared by every kind of node, and the arena types
//! ([`NodeId`], [`NodeEntry`]) the [`crate::model::Model`] uses to hold a
//! possibly-cyclic graph without reference-counted interior mutability.

use std::collections::BTreeSet;

use crate::factory::FactoryState;
use crate::metrics::NodeMetrics;
use crate::routing::RouterState;
use crate::service::ServiceState;

/// Index of a node inside the owning [`crate::model::Model`]'s arena. This
/// is the Rust substitute for the cyclic `next_node`/`prev_node` object
/// references described informally in the original design notes: nodes
/// never hold a live reference to a neighbor, only its index, and all
/// cross-node operations go through `Model` methods parameterized by
/// `NodeId`.
pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Idle,
    Busy,
    Blocked,
}

/// Fields every node kind shares, regardless of whether it's a factory, a
/// service node, or a router.
#[derive(Debug)]
pub struct NodeCommon {
    pub name: String,
    pub next_node: Option<NodeId>,
    pub prev_node: Option<NodeId>,
    pub current_time: f64,
    pub next_time: f64,
    pub state: NodeState,
    pub metrics: NodeMetrics,
    pub blocked_predecessors: BTreeSet<NodeId>,
}

impl NodeCommon {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_node: None,
            prev_node: None,
            current_time: 0.0,
            next_time: f64::INFINITY,
            state: NodeState::Idle,
            metrics: NodeMetrics::default(),
            blocked_predecessors: BTreeSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.current_time = 0.0;
        self.next_time = f64::INFINITY;
        self.state = NodeState::Idle;
        self.metrics.reset();
        self.blocked_predecessors.clear();
    }
}

/// The kind-specific payload. A `match` on this enum replaces virtual
/// dispatch through a `Node` trait object: every operation that needs to
/// behave differently per node kind lives in `factory.rs`, `service.rs`,
/// or `routing.rs` as a plain function taking `&mut NodeCommon` plus the
/// kind's own state, and `model.rs` is the only place that matches on
/// `NodeKind`.
#[derive(Debug)]
pub enum NodeKind {
    Factory(FactoryState),
    Service(ServiceState),
    Router(RouterState),
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Factory(_) => "factory",
            NodeKind::Service(_) => "service",
            NodeKind::Router(_) => "router",
        }
    }
}

/// One arena slot: a node's shared state plus its kind-specific payload.
#[derive(Debug)]
pub struct NodeEntry {
    pub common: NodeCommon,
    pub kind: NodeKind,
}

impl NodeEntry {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            common: NodeCommon::new(name),
            kind,
        }
    }
}
