// SPDX-License-Identifier: Apache-2.0

//! The pool of parallel service channels backing a [`crate::service::ServiceState`].

use std::collections::{HashMap, HashSet};

use qnet_config::TieBreak;

use crate::collections::{BoundedCollection, PriorityQueue};
use crate::task::{ChannelId, Task, TaskId};
use crate::time::TimeKey;

/// Owns the free/occupied channel sets and the min-heap of active tasks
/// keyed by completion time (ties broken FIFO by task creation order, so
/// two tasks completing at the same instant finish in the order their
/// channels were occupied).
#[derive(Debug)]
pub struct ChannelPool {
    max_channels: Option<usize>,
    next_channel_id: ChannelId,
    free_channels: Vec<ChannelId>,
    occupied_channels: HashSet<ChannelId>,
    tasks: PriorityQueue<TaskId, TimeKey>,
    task_channel: HashMap<TaskId, ChannelId>,
    task_data: HashMap<TaskId, Task>,
}

impl ChannelPool {
    pub fn new(max_channels: Option<usize>) -> Self {
        Self {
            max_channels,
            next_channel_id: 0,
            free_channels: Vec::new(),
            occupied_channels: HashSet::new(),
            tasks: PriorityQueue::new(None, TieBreak::Fifo),
            task_channel: HashMap::new(),
            task_data: HashMap::new(),
        }
    }

    pub fn max_channels(&self) -> Option<usize> {
        self.max_channels
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied_channels.len()
    }

    /// True if at least one more channel could be occupied right now
    /// (either a free one exists, or the pool hasn't hit `max_channels`
    /// yet, or it's unbounded).
    pub fn has_capacity(&self) -> bool {
        match self.max_channels {
            None => true,
            Some(max) => self.occupied_channels.len() < max,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.occupied_channels.is_empty()
    }

    /// Occupies a channel (allocating a new one if none are free and the
    /// pool has room) and pushes a task onto the heap. Panics if called
    /// without capacity; callers must check [`Self::has_capacity`] first,
    /// matching the invariant that admission decisions happen in
    /// `service.rs`, not here.
    pub fn occupy(&mut self, task: Task) {
        assert!(self.has_capacity(), "occupy called without free capacity");
        let channel = self.free_channels.pop().unwrap_or_else(|| {
            let id = self.next_channel_id;
            self.next_channel_id += 1;
            id
        });
        self.occupied_channels.insert(channel);
        let id = task.id;
        let next_time = task.next_time;
        self.task_channel.insert(id, channel);
        self.task_data.insert(id, task);
        self.tasks
            .push(id, TimeKey(next_time))
            .expect("unbounded task heap never rejects a push");
    }

    /// Time of the earliest completion across all occupied channels, or
    /// `+inf` if none are occupied.
    pub fn next_completion_time(&self) -> f64 {
        self.tasks
            .peek()
            .map(|(_, TimeKey(t))| *t)
            .unwrap_or(f64::INFINITY)
    }

    /// Pops the earliest-completing task and frees its channel.
    pub fn complete_earliest(&mut self) -> Option<Task> {
        let (task_id, _) = self.tasks.pop().ok()?;
        let channel = self.task_channel.remove(&task_id)?;
        self.occupied_channels.remove(&channel);
        self.free_channels.push(channel);
        self.task_data.remove(&task_id)
    }

    /// Advances every occupied channel's load-time accounting by `dt` and
    /// every held item's clock, returning the per-channel deltas so the
    /// caller (`ServiceState::update_time`) can fold them into the node's
    /// metrics bag without this type needing to know about `NodeMetrics`.
    pub fn advance_time(&mut self, dt: f64, t: f64) -> Vec<(ChannelId, f64)> {
        for task in self.task_data.values_mut() {
            task.item.advance_time(t);
        }
        self.occupied_channels.iter().map(|&c| (c, dt)).collect()
    }

    pub fn reset(&mut self) {
        self.next_channel_id = 0;
        self.free_channels.clear();
        self.occupied_channels.clear();
        self.tasks.clear();
        self.task_channel.clear();
        self.task_data.clear();
    }
}
