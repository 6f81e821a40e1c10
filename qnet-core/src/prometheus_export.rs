// SPDX-License-Identifier: Apache-2.0

//! Optional Prometheus export of a running [`crate::model::Model`]'s
//! metrics, for host processes that already run a registry and want to
//! scrape simulation health instead of only reading it at the end of a
//! run. Gated behind the `prometheus-metrics` feature so the dependency
//! is never pulled in for callers that only want the engine.

use prometheus::{IntGaugeVec, Opts, Registry};

use crate::logger::Logger;
use crate::metrics::{ModelMetrics, NodeMetrics};
use crate::node::NodeState;

/// A [`Logger`] that mirrors every hook into a set of per-node gauges
/// registered on a caller-supplied [`Registry`]. Node name is the single
/// label on every metric, matching the one-series-per-node shape the
/// engine's own `NodeMetrics` bag already uses. Gauges rather than
/// counters throughout: `NodeMetrics` is already a cumulative ledger, so
/// each hook call sets the absolute value rather than incrementing one.
pub struct PrometheusLogger {
    num_in: IntGaugeVec,
    num_out: IntGaugeVec,
    num_failures: IntGaugeVec,
    num_blocks: IntGaugeVec,
    blocked_time: IntGaugeVec,
    node_state: IntGaugeVec,
    unblock_cycles: prometheus::IntGauge,
}

impl PrometheusLogger {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let num_in = IntGaugeVec::new(Opts::new("qnet_node_num_in", "items admitted"), &["node"])?;
        let num_out = IntGaugeVec::new(Opts::new("qnet_node_num_out", "items departed"), &["node"])?;
        let num_failures = IntGaugeVec::new(Opts::new("qnet_node_num_failures", "items lost to admission"), &["node"])?;
        let num_blocks = IntGaugeVec::new(Opts::new("qnet_node_num_blocks", "times a node entered Blocked"), &["node"])?;
        let blocked_time = IntGaugeVec::new(Opts::new("qnet_node_blocked_time_ms", "cumulative blocked duration, in milliseconds of simulated time"), &["node"])?;
        let node_state = IntGaugeVec::new(Opts::new("qnet_node_state", "0=Idle, 1=Busy, 2=Blocked"), &["node"])?;
        let unblock_cycles = prometheus::IntGauge::new("qnet_model_unblock_cycles", "safety-net sweeps performed")?;

        registry.register(Box::new(num_in.clone()))?;
        registry.register(Box::new(num_out.clone()))?;
        registry.register(Box::new(num_failures.clone()))?;
        registry.register(Box::new(num_blocks.clone()))?;
        registry.register(Box::new(blocked_time.clone()))?;
        registry.register(Box::new(node_state.clone()))?;
        registry.register(Box::new(unblock_cycles.clone()))?;

        Ok(Self {
            num_in,
            num_out,
            num_failures,
            num_blocks,
            blocked_time,
            node_state,
            unblock_cycles,
        })
    }
}

impl Logger for PrometheusLogger {
    fn node_state(&self, node_name: &str, _time: f64, state: NodeState) {
        let code = match state {
            NodeState::Idle => 0,
            NodeState::Busy => 1,
            NodeState::Blocked => 2,
        };
        self.node_state.with_label_values(&[node_name]).set(code);
    }

    fn node_metrics(&self, node_name: &str, _time: f64, metrics: &NodeMetrics) {
        let labels = [node_name];
        self.num_in.with_label_values(&labels).set(metrics.num_in as i64);
        self.num_out.with_label_values(&labels).set(metrics.num_out as i64);
        self.num_failures.with_label_values(&labels).set(metrics.num_failures as i64);
        self.num_blocks.with_label_values(&labels).set(metrics.num_blocks as i64);
        self.blocked_time
            .with_label_values(&labels)
            .set((metrics.blocked_time * 1000.0) as i64);
    }

    fn model_metrics(&self, _time: f64, metrics: &ModelMetrics) {
        self.unblock_cycles.set(metrics.num_unblock_cycles as i64);
    }

    fn evaluation_report(&self, _name: &str, _value: f64) {
        // Evaluations are ad hoc, caller-defined quantities; exporting an
        // unbounded set of gauge names from a closure's label isn't a good
        // fit for Prometheus's fixed-cardinality model, so these are left
        // to the `TracingLogger`/log-based path instead.
    }
}
