// SPDX-License-Identifier: Apache-2.0

//! Boundary behaviors that don't fit naturally as single-node unit tests:
//! zero-capacity edges, simultaneous events, and an empty model.

use qnet_core::{BlockingPolicy, Item, ModelBuilder, NodeState};

fn constant_delay(d: f64) -> Box<dyn FnMut(&Item) -> f64> {
    Box::new(move |_: &Item| d)
}

#[test]
fn a_model_with_no_nodes_makes_no_progress() {
    let builder = ModelBuilder::new();
    let mut model = builder.build().unwrap();
    assert!(!model.step(100.0).unwrap());
}

#[test]
fn zero_channel_service_node_loses_every_arrival() {
    let mut builder = ModelBuilder::new();
    let factory = builder.add_factory("arrivals", Box::new(|| 1.0)).unwrap();
    let svc = builder.add_service("svc", Some(0), Some(0), constant_delay(1.0)).unwrap();
    builder.connect(factory, svc).unwrap();
    let mut model = builder.build().unwrap();

    model.simulate(5.0).unwrap();
    let m = model.node_metrics(svc);
    assert_eq!(m.num_failures, 5);
    assert_eq!(m.num_in, 5);
    assert_eq!(m.num_out, 0);
}

#[test]
fn zero_capacity_queue_still_allows_direct_channel_admission() {
    // queue_capacity = 0 only forbids *waiting*; a free channel still
    // admits directly, so this is not the same as "always full".
    let mut builder = ModelBuilder::new();
    let factory = builder.add_factory("arrivals", Box::new(|| 0.5)).unwrap();
    let svc = builder.add_service("svc", Some(1), Some(0), constant_delay(1000.0)).unwrap();
    builder.connect(factory, svc).unwrap();
    let mut model = builder.build().unwrap();

    model.simulate(0.6).unwrap();
    let m = model.node_metrics(svc);
    assert_eq!(m.num_in, 1);
    assert_eq!(m.num_failures, 0);
}

#[test]
fn simultaneous_completions_both_fire_within_the_same_step() {
    // Two independent single-channel nodes, each fed by its own factory
    // with the same arrival and service delay, complete at exactly the
    // same instant; both must be drained by one `step` rather than only
    // one winning the epsilon comparison.
    let mut builder = ModelBuilder::new();
    let factory_a = builder.add_factory("arrivals_a", Box::new(|| 1.0)).unwrap();
    let factory_b = builder.add_factory("arrivals_b", Box::new(|| 1.0)).unwrap();
    let a = builder.add_service("a", Some(5), None, constant_delay(2.0)).unwrap();
    let b = builder.add_service("b", Some(5), None, constant_delay(2.0)).unwrap();
    builder.connect(factory_a, a).unwrap();
    builder.connect(factory_b, b).unwrap();
    let mut model = builder.build().unwrap();

    // Both nodes' first arrivals land at t=1 and complete at t=3.
    model.simulate(3.0).unwrap();
    assert_eq!(model.node_metrics(a).num_out, 1);
    assert_eq!(model.node_metrics(b).num_out, 1);
}

#[test]
fn blocking_a_terminal_configured_node_is_rejected_at_build_even_with_on_queue_length_policy() {
    let mut builder = ModelBuilder::new();
    let svc = builder
        .add_service_with_blocking(
            "svc",
            Some(1),
            Some(5),
            constant_delay(1.0),
            BlockingPolicy::on_queue_length(3),
        )
        .unwrap();
    builder.seed_blocked(svc, vec![Item::new("stuck", 0.0)]);
    let err = builder.build().unwrap_err();
    assert!(format!("{err}").contains("terminal"));
}

#[test]
fn unbounded_queue_never_reports_full() {
    let mut builder = ModelBuilder::new();
    let factory = builder.add_factory("arrivals", Box::new(|| 0.1)).unwrap();
    let svc = builder.add_service("svc", Some(1), None, constant_delay(1000.0)).unwrap();
    builder.connect(factory, svc).unwrap();
    let mut model = builder.build().unwrap();

    model.simulate(20.0).unwrap();
    let m = model.node_metrics(svc);
    assert_eq!(m.num_failures, 0);
    assert!(m.num_in >= 100);
}

#[test]
fn a_node_at_idle_has_empty_channel_pool_and_no_blocked_tasks() {
    let mut builder = ModelBuilder::new();
    let svc = builder.add_service("svc", Some(1), Some(0), constant_delay(1.0)).unwrap();
    let model = builder.build().unwrap();
    assert_eq!(model.node_state(svc), NodeState::Idle);
}
