// tests/uniqueness.rs

mod common;

use crate::common::builders::linear_chain;
use crate::common::init_tracing;

use workchain::chain::{ChainState, NodeId, NodeStatus, Resolution};
use workchain::constraints::Environment;
use workchain::engine::{ChainId, Dispatcher, NodeKey, Outcome};
use workchain::types::UniquenessPolicy;

#[test]
fn replace_cancels_existing_before_new_chain_queues() {
    init_tracing();
    let mut dispatcher = Dispatcher::new(1, Environment::default());

    let (first, _) = dispatcher.submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Replace);
    assert_eq!(first.resolution, Resolution::Admit);

    let (second, step) = dispatcher.submit(linear_chain("img", &["x", "y"]), UniquenessPolicy::Replace);
    assert_eq!(second.resolution, Resolution::ReplaceCancelExisting);
    assert_ne!(second.chain_id, first.chain_id);
    assert_eq!(step.cancelled_running, vec![NodeKey::new(first.chain_id, NodeId(0))]);
    assert!(step.changed.contains(&first.chain_id));
    assert!(step.changed.contains(&second.chain_id));

    assert_eq!(dispatcher.chain(first.chain_id).unwrap().state(), ChainState::Cancelled);
    assert_eq!(dispatcher.chain_by_name("img").unwrap().id(), second.chain_id);

    // The cancelled attempt still holds the only slot until it reports back.
    assert!(step.dispatched.is_empty());
    assert_eq!(
        dispatcher.node_status(NodeKey::new(second.chain_id, NodeId(0))),
        Some(NodeStatus::Queued)
    );

    let step = dispatcher.complete(NodeKey::new(first.chain_id, NodeId(0)), 1, Outcome::failure("cancelled"));
    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(step.dispatched[0].kind, "x");
    assert_eq!(dispatcher.chain(first.chain_id).unwrap().state(), ChainState::Cancelled);
}

#[test]
fn replace_twice_leaves_only_the_newest_chain_live() {
    init_tracing();
    let mut dispatcher = Dispatcher::new(2, Environment::default());

    let (c1, _) = dispatcher.submit(linear_chain("img", &["a"]), UniquenessPolicy::Replace);
    let (c2, _) = dispatcher.submit(linear_chain("img", &["a"]), UniquenessPolicy::Replace);
    let (c3, _) = dispatcher.submit(linear_chain("img", &["a"]), UniquenessPolicy::Replace);

    assert_eq!(dispatcher.chain(c1.chain_id).unwrap().state(), ChainState::Cancelled);
    assert_eq!(dispatcher.chain(c2.chain_id).unwrap().state(), ChainState::Cancelled);
    assert!(!dispatcher.chain(c3.chain_id).unwrap().state().is_terminal());
    assert_eq!(dispatcher.chain_state("img"), dispatcher.chain(c3.chain_id).map(|c| c.state()));
}

#[test]
fn keep_rejects_while_existing_is_in_flight() {
    init_tracing();
    let mut dispatcher = Dispatcher::new(1, Environment::default());

    let (first, _) = dispatcher.submit(linear_chain("img", &["a"]), UniquenessPolicy::Keep);
    let (second, step) = dispatcher.submit(linear_chain("img", &["b"]), UniquenessPolicy::Keep);

    assert_eq!(second.resolution, Resolution::Reject);
    assert_eq!(second.chain_id, first.chain_id);
    assert!(step.dispatched.is_empty());
    assert!(step.cancelled_running.is_empty());
    assert_eq!(dispatcher.chain_by_name("img").map(|c| c.id()), Some(first.chain_id));
    assert_eq!(dispatcher.chain(first.chain_id).unwrap().graph().node_count(), 1);
}

#[test]
fn append_runs_new_stages_after_existing_ones() {
    init_tracing();
    let mut dispatcher = Dispatcher::new(2, Environment::default());

    let (first, _) = dispatcher.submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Append);
    let (second, step) = dispatcher.submit(linear_chain("img", &["c"]), UniquenessPolicy::Append);

    assert_eq!(second.resolution, Resolution::Append);
    assert_eq!(second.chain_id, first.chain_id);
    assert!(step.dispatched.is_empty());

    let chain = dispatcher.chain(first.chain_id).unwrap();
    assert_eq!(chain.graph().stage_count(), 3);
    assert_eq!(chain.descriptor(NodeId(2)).unwrap().kind, "c");

    let key = |n| NodeKey::new(first.chain_id, NodeId(n));
    let step = dispatcher.complete(key(0), 1, Outcome::done());
    assert_eq!(step.dispatched[0].kind, "b");
    let step = dispatcher.complete(key(1), 1, Outcome::done());
    assert_eq!(step.dispatched[0].kind, "c");
    dispatcher.complete(key(2), 1, Outcome::done());
    assert_eq!(dispatcher.chain_state("img"), Some(ChainState::Succeeded));
}

#[test]
fn terminal_existing_chain_is_simply_admitted() {
    init_tracing();
    for policy in [UniquenessPolicy::Replace, UniquenessPolicy::Keep, UniquenessPolicy::Append] {
        let mut dispatcher = Dispatcher::new(1, Environment::default());
        let (first, _) = dispatcher.submit(linear_chain("img", &["a"]), policy);
        dispatcher.complete(NodeKey::new(first.chain_id, NodeId(0)), 1, Outcome::done());
        assert_eq!(dispatcher.chain_state("img"), Some(ChainState::Succeeded));

        let (second, step) = dispatcher.submit(linear_chain("img", &["b"]), policy);
        assert_eq!(second.resolution, Resolution::Admit, "{policy:?}");
        assert_ne!(second.chain_id, first.chain_id);
        assert!(step.cancelled_running.is_empty());
        assert_eq!(step.dispatched.len(), 1);
    }
}

#[test]
fn chains_with_different_names_are_independent() {
    init_tracing();
    let mut dispatcher = Dispatcher::new(2, Environment::default());

    let (a, _) = dispatcher.submit(linear_chain("one", &["a"]), UniquenessPolicy::Replace);
    let (b, step) = dispatcher.submit(linear_chain("two", &["b"]), UniquenessPolicy::Replace);

    assert_eq!(b.resolution, Resolution::Admit);
    assert!(step.cancelled_running.is_empty());
    assert_eq!(a.chain_id, ChainId(1));
    assert_eq!(b.chain_id, ChainId(2));
    assert_eq!(dispatcher.running_len(), 2);
}
