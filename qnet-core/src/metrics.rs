// SPDX-License-Identifier: Apache-2.0

//! The time-integrated and per-event metrics bag attached to every node,
//! plus the model-level counters in [`ModelMetrics`].

use std::collections::HashMap;

use crate::task::ChannelId;

const EPS: f64 = 1e-12;

/// Per-node metrics. Every field here is mutated only from the documented
/// hooks in `node.rs`/`service.rs`/`factory.rs`; nothing else in the crate
/// writes to it directly, so a reviewer can treat this struct as a pure
/// accounting ledger.
#[derive(Debug, Clone, Default)]
pub struct NodeMetrics {
    pub num_in: u64,
    pub num_out: u64,
    pub num_failures: u64,
    pub num_blocks: u64,
    pub max_blocked_tasks: u64,
    pub blocked_time: f64,
    pub total_wait_time: f64,
    pub passed_time: f64,
    pub in_intervals_sum: f64,
    pub out_intervals_sum: f64,
    pub last_in_time: Option<f64>,
    pub last_out_time: Option<f64>,
    pub load_time_per_channel: HashMap<ChannelId, f64>,
}

impl NodeMetrics {
    pub fn record_in(&mut self, time: f64) {
        self.num_in += 1;
        if let Some(last) = self.last_in_time {
            self.in_intervals_sum += time - last;
        }
        self.last_in_time = Some(time);
    }

    pub fn record_out(&mut self, time: f64) {
        self.num_out += 1;
        if let Some(last) = self.last_out_time {
            self.out_intervals_sum += time - last;
        }
        self.last_out_time = Some(time);
    }

    pub fn record_failure(&mut self) {
        self.num_failures += 1;
    }

    pub fn record_block(&mut self, currently_blocked: usize) {
        self.num_blocks += 1;
        self.max_blocked_tasks = self.max_blocked_tasks.max(currently_blocked as u64);
    }

    pub fn record_unblock(&mut self, blocked_start_time: f64, now: f64) {
        self.blocked_time += now - blocked_start_time;
    }

    pub fn integrate_time(&mut self, dt: f64, queue_len: usize, channel_deltas: &[(ChannelId, f64)]) {
        self.passed_time += dt;
        self.total_wait_time += queue_len as f64 * dt;
        for &(channel, delta) in channel_deltas {
            *self.load_time_per_channel.entry(channel).or_insert(0.0) += delta;
        }
    }

    pub fn mean_queuelen(&self) -> f64 {
        self.total_wait_time / self.passed_time.max(EPS)
    }

    pub fn mean_channels_load(&self) -> f64 {
        self.load_time_per_channel.values().sum::<f64>() / self.passed_time.max(EPS)
    }

    pub fn failure_proba(&self) -> f64 {
        self.num_failures as f64 / (self.num_in.max(1)) as f64
    }

    pub fn mean_wait_time(&self) -> f64 {
        self.total_wait_time / (self.num_out.max(1)) as f64
    }

    pub fn mean_in_interval(&self) -> f64 {
        self.in_intervals_sum / (self.num_in.saturating_sub(1).max(1)) as f64
    }

    pub fn blocking_proba(&self) -> f64 {
        self.num_blocks as f64 / (self.num_out.max(1)) as f64
    }

    pub fn mean_blocked_time(&self) -> f64 {
        self.blocked_time / (self.num_blocks.max(1)) as f64
    }

    pub fn reset(&mut self) {
        *self = NodeMetrics::default();
    }
}

/// Model-wide counters that don't belong to any single node.
#[derive(Debug, Clone, Default)]
pub struct ModelMetrics {
    pub passed_time: f64,
    pub num_unblock_cycles: u64,
}

impl ModelMetrics {
    pub fn reset(&mut self) {
        *self = ModelMetrics::default();
    }
}
