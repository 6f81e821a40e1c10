// SPDX-License-Identifier: Apache-2.0

//! A discrete-event simulator for open queueing networks: factories that
//! emit items, service nodes with bounded channels and waiting queues,
//! and routers that forward items onward by a configurable policy.
//!
//! The crate is organized around an arena graph: [`model::Model`] owns
//! every node in a `Vec` and nodes refer to each other by [`node::NodeId`]
//! rather than by live reference, which is what lets the graph contain
//! cycles and what makes the blocking discipline (a node holding a
//! finished item because its neighbor has no room) representable without
//! interior mutability. Build a model with [`model::ModelBuilder`], then
//! drive it with [`model::Model::simulate`].

pub mod channel_pool;
pub mod collections;
pub mod error;
pub mod factory;
pub mod item;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod node;
pub mod routing;
pub mod service;
pub mod task;
pub mod time;

#[cfg(feature = "prometheus-metrics")]
pub mod prometheus_export;

pub use error::EngineError;
pub use item::{ActionKind, ActionRecord, Item};
pub use logger::{Evaluation, Logger, NullLogger, TracingLogger};
pub use model::{Model, ModelBuilder};
pub use node::{NodeId, NodeState};
pub use routing::RoutingPolicy;
pub use service::BlockingPolicy;

pub use qnet_config::{ConfigError, ModelConfig, TieBreak, Verbosity};
