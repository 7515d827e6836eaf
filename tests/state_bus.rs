// tests/state_bus.rs

mod common;

use std::collections::BTreeSet;

use crate::common::{init_tracing, with_timeout};

use tokio_stream::StreamExt;
use workchain::bus::{ChainSnapshot, NodeSnapshot, ObserveTag, StateBus};
use workchain::chain::{ChainState, NodeId, NodeStatus};
use workchain::engine::ChainId;

fn snapshot(name: &str, id: u64, seq: u64, state: ChainState, tags: &[&str]) -> ChainSnapshot {
    ChainSnapshot {
        name: name.to_string(),
        chain_id: ChainId(id),
        state,
        seq,
        nodes: vec![NodeSnapshot {
            id: NodeId(0),
            kind: "a".to_string(),
            stage: 0,
            status: NodeStatus::NotReady,
            attempt: 0,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            output: None,
            failure: None,
        }],
    }
}

#[tokio::test]
async fn subscribers_receive_in_publication_order() {
    init_tracing();
    let bus = StateBus::new();
    let mut sub = bus.subscribe(ObserveTag::chain("img"));

    for seq in 1..=3 {
        bus.publish(snapshot("img", 1, seq, ChainState::Running, &[]));
    }

    for expected in 1..=3 {
        let got = with_timeout(sub.next()).await.unwrap();
        assert_eq!(got.seq, expected);
    }
    assert!(sub.try_next().is_none());
}

#[tokio::test]
async fn late_subscriber_gets_latest_snapshot_first() {
    init_tracing();
    let bus = StateBus::new();
    bus.publish(snapshot("img", 1, 1, ChainState::Pending, &[]));
    bus.publish(snapshot("img", 1, 2, ChainState::Succeeded, &[]));

    let mut sub = bus.subscribe(ObserveTag::chain("img"));
    let replayed = sub.try_next().unwrap();
    assert_eq!(replayed.seq, 2);
    assert_eq!(replayed.state, ChainState::Succeeded);
    assert!(sub.try_next().is_none());
}

#[tokio::test]
async fn tag_subscription_filters_chains() {
    init_tracing();
    let bus = StateBus::new();
    let mut sub = bus.subscribe(ObserveTag::tag("output"));

    bus.publish(snapshot("plain", 1, 1, ChainState::Running, &[]));
    bus.publish(snapshot("img", 2, 1, ChainState::Running, &["output"]));

    let got = with_timeout(sub.next()).await.unwrap();
    assert_eq!(got.name, "img");
    assert!(sub.try_next().is_none());
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    init_tracing();
    let bus = StateBus::new();
    let sub = bus.subscribe(ObserveTag::chain("img"));
    let other = bus.subscribe(ObserveTag::chain("img"));
    assert_eq!(bus.observer_count(), 2);

    drop(sub);
    assert_eq!(bus.observer_count(), 1);

    other.unsubscribe();
    assert_eq!(bus.observer_count(), 0);

    // Publishing with nobody listening still updates the replay cache.
    bus.publish(snapshot("img", 1, 1, ChainState::Running, &[]));
    assert_eq!(bus.latest("img").map(|s| s.seq), Some(1));
}

#[tokio::test]
async fn replay_cache_follows_the_newest_chain() {
    init_tracing();
    let bus = StateBus::new();
    bus.publish(snapshot("img", 2, 1, ChainState::Running, &[]));
    // Late transition of the replaced chain.
    bus.publish(snapshot("img", 1, 9, ChainState::Cancelled, &[]));

    assert_eq!(bus.latest("img").map(|s| s.chain_id), Some(ChainId(2)));

    bus.forget("img", ChainId(1));
    assert!(bus.latest("img").is_some());
    bus.forget("img", ChainId(2));
    assert!(bus.latest("img").is_none());
}

#[tokio::test]
async fn subscription_ends_when_bus_is_gone() {
    init_tracing();
    let bus = StateBus::new();
    let mut sub = bus.subscribe(ObserveTag::chain("img"));
    bus.publish(snapshot("img", 1, 1, ChainState::Running, &[]));
    drop(bus);

    assert!(with_timeout(sub.next()).await.is_some());
    assert!(with_timeout(sub.next()).await.is_none());
}

#[tokio::test]
async fn subscription_is_a_stream() {
    init_tracing();
    let bus = StateBus::new();
    let sub = bus.subscribe(ObserveTag::chain("img"));

    bus.publish(snapshot("img", 1, 1, ChainState::Running, &[]));
    bus.publish(snapshot("img", 1, 2, ChainState::Succeeded, &[]));
    drop(bus);

    let seqs: Vec<u64> = with_timeout(sub.map(|s| s.seq).collect()).await;
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn output_is_only_exposed_for_succeeded_nodes() {
    use workchain::chain::Data;

    let mut snap = snapshot("img", 1, 1, ChainState::Running, &["output"]);
    snap.nodes[0].output = Some(Data::new().with("image_uri", "uri3"));
    assert!(snap.output_of("output", "image_uri").is_none());

    snap.nodes[0].status = NodeStatus::Succeeded;
    assert_eq!(
        snap.output_of("output", "image_uri").and_then(|v| v.as_str()),
        Some("uri3")
    );
    assert_eq!(snap.count(NodeStatus::Succeeded), 1);

    // The returned value borrows the snapshot only, not the tag.
    let uri = {
        let tag = String::from("output");
        snap.output_of(&tag, "image_uri")
    };
    assert_eq!(uri.and_then(|v| v.as_str()), Some("uri3"));
}
