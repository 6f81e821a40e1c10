// SPDX-License-Identifier: Apache-2.0

//! Runtime errors raised while a [`crate::model::Model`] is stepping.
//! Construction-time validation errors live in `qnet_config::ConfigError`.

use crate::node::NodeId;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EngineError {
    #[error("node {0} has no registered entry in this model")]
    UnknownNode(NodeId),

    #[error("factory node {0} cannot receive items, only emit them")]
    FactoryCannotReceive(NodeId),

    #[error("simulate() called with an end_time ({0}) not after the model's current_time ({1})")]
    EndTimeNotInFuture(f64, f64),
}
