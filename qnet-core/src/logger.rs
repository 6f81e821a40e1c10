// SPDX-License-Identifier: Apache-2.0

//! Observability seam: [`Logger`] is invoked by [`crate::model::Model`] at
//! the verbosity-gated points named in the original design (per-step node
//! state, per-step node metrics, end-of-run model metrics, and end-of-run
//! evaluation reports). [`TracingLogger`] is the ambient default; swap in
//! [`NullLogger`] for hot loops (e.g. Monte Carlo replication) where even
//! a disabled `tracing` span is unwanted overhead.

use qnet_config::Verbosity;

use crate::metrics::{ModelMetrics, NodeMetrics};
use crate::model::Model;
use crate::node::NodeState;

pub trait Logger {
    fn node_state(&self, node_name: &str, time: f64, state: NodeState);
    fn node_metrics(&self, node_name: &str, time: f64, metrics: &NodeMetrics);
    fn model_metrics(&self, time: f64, metrics: &ModelMetrics);
    fn evaluation_report(&self, name: &str, value: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn node_state(&self, _node_name: &str, _time: f64, _state: NodeState) {}
    fn node_metrics(&self, _node_name: &str, _time: f64, _metrics: &NodeMetrics) {}
    fn model_metrics(&self, _time: f64, _metrics: &ModelMetrics) {}
    fn evaluation_report(&self, _name: &str, _value: f64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn node_state(&self, node_name: &str, time: f64, state: NodeState) {
        tracing::debug!(node = node_name, time, ?state, "node state");
    }

    fn node_metrics(&self, node_name: &str, time: f64, metrics: &NodeMetrics) {
        tracing::debug!(
            node = node_name,
            time,
            num_in = metrics.num_in,
            num_out = metrics.num_out,
            num_failures = metrics.num_failures,
            num_blocks = metrics.num_blocks,
            "node metrics"
        );
    }

    fn model_metrics(&self, time: f64, metrics: &ModelMetrics) {
        tracing::info!(
            time,
            passed_time = metrics.passed_time,
            num_unblock_cycles = metrics.num_unblock_cycles,
            "model metrics"
        );
    }

    fn evaluation_report(&self, name: &str, value: f64) {
        tracing::info!(evaluation = name, value, "evaluation report");
    }
}

/// A named read-only function of the finished model, reported once at the
/// end of `simulate()` when the run's verbosity logs metrics.
pub struct Evaluation {
    pub name: String,
    f: Box<dyn Fn(&Model) -> f64>,
}

impl Evaluation {
    pub fn new(name: impl Into<String>, f: impl Fn(&Model) -> f64 + 'static) -> Self {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }

    pub fn evaluate(&self, model: &Model) -> f64 {
        (self.f)(model)
    }
}

impl std::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluation").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Picks the logger implied by a verbosity level: silence logs nothing,
/// anything else drives `TracingLogger`. Kept as a free function rather
/// than a `From` impl so `ModelBuilder` can still let callers override it
/// with a custom [`Logger`] entirely (e.g. the optional prometheus
/// exporter).
pub fn logger_for_verbosity(verbosity: Verbosity) -> Box<dyn Logger> {
    match verbosity {
        Verbosity::None => Box::new(NullLogger),
        _ => Box::new(TracingLogger),
    }
}
