// SPDX-License-Identifier: Apache-2.0

//! The sole source of externally new items.

use crate::item::Item;
use crate::node::NodeCommon;

pub type DelayFn = Box<dyn FnMut() -> f64>;

pub struct FactoryState {
    pub delay: DelayFn,
    pub last_created_id: Option<String>,
    item_counter: u64,
}

impl std::fmt::Debug for FactoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryState")
            .field("last_created_id", &self.last_created_id)
            .field("item_counter", &self.item_counter)
            .finish_non_exhaustive()
    }
}

impl FactoryState {
    pub fn new(delay: DelayFn) -> Self {
        Self {
            delay,
            last_created_id: None,
            item_counter: 0,
        }
    }

    pub fn reset(&mut self) {
        self.last_created_id = None;
        self.item_counter = 0;
    }
}

/// Schedules the first arrival. Must be called once, right after the
/// factory is added to the graph, before the model starts stepping.
pub fn schedule_first_arrival(common: &mut NodeCommon, state: &mut FactoryState) {
    let delay = (state.delay)();
    debug_assert!(delay >= 0.0, "delay function returned a negative delay");
    common.next_time = common.current_time + delay;
}

/// Creates the next item and reschedules the factory's own `next_time`.
/// Does not perform the handoff to `next_node`: that requires cross-node
/// access and is the caller's (`Model::end_action`'s) job.
pub fn end_action(common: &mut NodeCommon, state: &mut FactoryState) -> Item {
    let id = format!("{}_{}", common.name, state.item_counter);
    state.item_counter += 1;
    let item = Item::new(id.clone(), common.current_time);
    state.last_created_id = Some(id);

    common.metrics.record_out(common.current_time);

    let delay = (state.delay)();
    debug_assert!(delay >= 0.0, "delay function returned a negative delay");
    common.next_time = common.current_time + delay;

    item
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_first_arrival_sets_next_time_from_delay() {
        let mut common = NodeCommon::new("factory_a");
        let mut state = FactoryState::new(Box::new(|| 3.5));
        schedule_first_arrival(&mut common, &mut state);
        assert_eq!(common.next_time, 3.5);
    }

    #[test]
    fn end_action_creates_ids_from_node_name_and_counter() {
        let mut common = NodeCommon::new("factory_a");
        common.current_time = 0.0;
        let mut state = FactoryState::new(Box::new(|| 1.0));
        let item1 = end_action(&mut common, &mut state);
        assert_eq!(item1.id(), "factory_a_0");
        common.current_time = 1.0;
        let item2 = end_action(&mut common, &mut state);
        assert_eq!(item2.id(), "factory_a_1");
        assert_eq!(common.next_time, 2.0);
        assert_eq!(state.last_created_id.as_deref(), Some("factory_a_1"));
    }

    #[test]
    fn end_action_counts_as_an_out_event() {
        let mut common = NodeCommon::new("factory_a");
        let mut state = FactoryState::new(Box::new(|| 1.0));
        end_action(&mut common, &mut state);
        assert_eq!(common.metrics.num_out, 1);
    }
}
