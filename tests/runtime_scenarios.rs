// tests/runtime_scenarios.rs

mod common;
use crate::common::builders::{fast_retry, linear_chain, test_options};
use crate::common::fake_executor::{ControllableExecutor, ExecutionLog, Gate, ScriptedExecutor};
use crate::common::{init_tracing, wait_state, with_timeout};

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use workchain::bus::ObserveTag;
use workchain::chain::{ChainBuilder, ChainState, Data, NodeId, NodeStatus, Resolution, RetryPolicy, TaskSpec};
use workchain::constraints::Environment;
use workchain::engine::{launch, launch_with, NodeKey, Outcome};
use workchain::errors::NodeFailure;
use workchain::exec::{BoxFuture, Computation, TaskContext, TaskRegistry};
use workchain::pipeline::{image_chain, BLUR, CLEANUP, KEY_IMAGE_URI, SAVE_IMAGE, TAG_OUTPUT};
use workchain::store::{ChainStore, MemoryStore};
use workchain::types::UniquenessPolicy;

type TestResult = Result<(), Box<dyn Error>>;

type Seen = Arc<Mutex<Vec<(String, Data)>>>;

fn record(seen: &Seen, ctx: &TaskContext) {
    seen.lock().unwrap().push((ctx.kind.clone(), ctx.input.clone()));
}

/// Registry for the image pipeline that only passes references around.
fn reference_registry(seen: Seen) -> TaskRegistry {
    let (s1, s2, s3) = (seen.clone(), seen.clone(), seen);
    TaskRegistry::new()
        .with(BLUR, move |ctx: TaskContext| {
            record(&s1, &ctx);
            async move { Outcome::Success(Data::new().with(KEY_IMAGE_URI, "uri2")) }
        })
        .with(SAVE_IMAGE, move |ctx: TaskContext| {
            record(&s2, &ctx);
            async move { Outcome::Success(Data::new().with(KEY_IMAGE_URI, "uri3")) }
        })
        .with(CLEANUP, move |ctx: TaskContext| {
            record(&s3, &ctx);
            async move { Outcome::done() }
        })
}

#[tokio::test]
async fn image_chain_succeeds_and_exposes_saved_uri() -> TestResult {
    init_tracing();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let launched = launch(
        test_options(2),
        Environment::default(),
        reference_registry(Arc::clone(&seen)),
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::tag(TAG_OUTPUT));
    let chain = image_chain("img", "uri1", 1, RetryPolicy::no_retry())?;
    let handle = launched.client.submit(chain, UniquenessPolicy::Replace).await?;
    assert_eq!(handle.resolution, Resolution::Admit);

    let done = wait_state(&mut sub, handle.chain_id, ChainState::Succeeded).await;
    assert_eq!(
        done.output_of(TAG_OUTPUT, KEY_IMAGE_URI).and_then(|v| v.as_str()),
        Some("uri3")
    );

    let seen = seen.lock().unwrap().clone();
    let kinds: Vec<_> = seen.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(kinds, vec![BLUR, SAVE_IMAGE, CLEANUP]);
    assert_eq!(seen[0].1.get_str(KEY_IMAGE_URI), Some("uri1"));
    assert_eq!(seen[1].1.get_str(KEY_IMAGE_URI), Some("uri2"));

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn cancel_during_second_blur_never_starts_save() -> TestResult {
    init_tracing();
    let gate = Gate::new();
    let launched = launch_with(
        test_options(2),
        Environment::default(),
        {
            let gate = gate.clone();
            move |tx| ControllableExecutor::new(tx, gate)
        },
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let chain = image_chain("img", "uri1", 3, RetryPolicy::no_retry())?;
    let handle = launched.client.submit(chain, UniquenessPolicy::Replace).await?;

    with_timeout(gate.wait_kind(BLUR)).await;
    assert!(gate.release_kind(BLUR, Outcome::done()));
    with_timeout(gate.log().wait_for_dispatches(2)).await;

    launched.client.cancel("img").await?;

    let mut snapshots = Vec::new();
    let cancelled = with_timeout(sub.wait_for(|s| {
        snapshots.push(s.clone());
        s.state == ChainState::Cancelled
    }))
    .await
    .ok_or("bus closed")?;

    let second_blur = NodeKey::new(handle.chain_id, NodeId(1));
    assert_eq!(gate.log().cancelled(), vec![second_blur]);
    assert_eq!(gate.log().dispatched_kinds(), vec![BLUR, BLUR]);

    for snapshot in &snapshots {
        for id in [NodeId(3), NodeId(4)] {
            let status = snapshot.node(id).map(|n| n.status);
            assert!(
                matches!(status, Some(NodeStatus::NotReady) | Some(NodeStatus::Cancelled)),
                "node {id} reached {status:?}"
            );
        }
    }
    assert_eq!(cancelled.node(NodeId(3)).map(|n| n.status), Some(NodeStatus::Cancelled));
    assert!(cancelled.output_of(TAG_OUTPUT, KEY_IMAGE_URI).is_none());

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn double_replace_cancels_first_and_second_completes() -> TestResult {
    init_tracing();
    let gate = Gate::new();
    let launched = launch_with(
        test_options(2),
        Environment::default(),
        {
            let gate = gate.clone();
            move |tx| ControllableExecutor::new(tx, gate)
        },
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let first = launched
        .client
        .submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Replace)
        .await?;
    let second = launched
        .client
        .submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Replace)
        .await?;

    assert_eq!(first.resolution, Resolution::Admit);
    assert_eq!(second.resolution, Resolution::ReplaceCancelExisting);

    wait_state(&mut sub, first.chain_id, ChainState::Cancelled).await;

    with_timeout(gate.wait_kind("a")).await;
    assert_eq!(gate.running().len(), 1);
    assert!(gate.release_kind("a", Outcome::done()));
    with_timeout(gate.wait_kind("b")).await;
    assert!(gate.release_kind("b", Outcome::done()));

    let done = wait_state(&mut sub, second.chain_id, ChainState::Succeeded).await;
    assert_eq!(done.count(NodeStatus::Succeeded), 2);
    assert_eq!(
        launched.client.latest("img").map(|s| s.chain_id),
        Some(second.chain_id)
    );

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn retry_outcome_is_attempted_exactly_max_attempts_times() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let launched = launch_with(
        test_options(1),
        Environment::default(),
        {
            let log = log.clone();
            move |tx| ScriptedExecutor::new(tx, log, |_| Outcome::retry("busy"))
        },
        Box::new(MemoryStore::new()),
    );

    let chain = ChainBuilder::begin("img", TaskSpec::new("flaky").retry(fast_retry(3))).build()?;
    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let handle = launched.client.submit(chain, UniquenessPolicy::Replace).await?;

    let failed = wait_state(&mut sub, handle.chain_id, ChainState::Failed).await;
    let node = failed.node(NodeId(0)).ok_or("missing node")?;
    assert_eq!(node.attempt, 3);
    assert_eq!(node.failure, Some(NodeFailure::MaxAttemptsExceeded { attempts: 3 }));

    let attempts: Vec<_> = log.dispatched().iter().map(|n| n.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn panicking_computation_fails_only_its_node() -> TestResult {
    init_tracing();
    let registry = TaskRegistry::new()
        .with("boom", |_ctx: TaskContext| async move {
            if true {
                panic!("kaboom");
            }
            Outcome::done()
        })
        .with("fine", |_ctx: TaskContext| async move { Outcome::done() });

    let launched = launch(
        test_options(2),
        Environment::default(),
        registry,
        Box::new(MemoryStore::new()),
    );

    let mut boom_sub = launched.client.observe(ObserveTag::chain("boom"));
    let mut fine_sub = launched.client.observe(ObserveTag::chain("fine"));

    let boom = launched
        .client
        .submit(linear_chain("boom", &["boom", "fine"]), UniquenessPolicy::Replace)
        .await?;
    let fine = launched
        .client
        .submit(linear_chain("fine", &["fine"]), UniquenessPolicy::Replace)
        .await?;

    let failed = wait_state(&mut boom_sub, boom.chain_id, ChainState::Failed).await;
    match &failed.node(NodeId(0)).ok_or("missing node")?.failure {
        Some(NodeFailure::Computation(msg)) => assert!(msg.contains("kaboom"), "{msg}"),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(failed.node(NodeId(1)).map(|n| n.status), Some(NodeStatus::Cancelled));

    wait_state(&mut fine_sub, fine.chain_id, ChainState::Succeeded).await;

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn unregistered_task_type_fails_the_node() -> TestResult {
    init_tracing();
    let launched = launch(
        test_options(1),
        Environment::default(),
        TaskRegistry::new(),
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let handle = launched
        .client
        .submit(linear_chain("img", &["missing"]), UniquenessPolicy::Replace)
        .await?;

    let failed = wait_state(&mut sub, handle.chain_id, ChainState::Failed).await;
    match &failed.node(NodeId(0)).ok_or("missing node")?.failure {
        Some(NodeFailure::Computation(msg)) => assert!(msg.contains("missing"), "{msg}"),
        other => panic!("unexpected failure: {other:?}"),
    }

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

/// Never returns and ignores its cancel signal.
struct Stubborn;

impl Computation for Stubborn {
    fn run(&self, _ctx: TaskContext) -> BoxFuture<Outcome> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Outcome::done()
        })
    }
}

#[tokio::test]
async fn computation_ignoring_cancel_is_aborted_after_grace() -> TestResult {
    init_tracing();
    let launched = launch(
        test_options(1),
        Environment::default(),
        TaskRegistry::new().with("stubborn", Stubborn).with("quick", |_ctx: TaskContext| async move {
            Outcome::done()
        }),
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("other"));
    launched
        .client
        .submit(linear_chain("img", &["stubborn"]), UniquenessPolicy::Replace)
        .await?;
    let other = launched
        .client
        .submit(linear_chain("other", &["quick"]), UniquenessPolicy::Replace)
        .await?;

    // The only slot is held until the stubborn attempt is aborted.
    tokio::time::sleep(Duration::from_millis(20)).await;
    launched.client.cancel("img").await?;

    wait_state(&mut sub, other.chain_id, ChainState::Succeeded).await;
    assert_eq!(
        launched.client.latest("img").map(|s| s.state),
        Some(ChainState::Cancelled)
    );

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn cooperative_computation_sees_cancel_signal() -> TestResult {
    init_tracing();
    let observed = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&observed);

    let registry = TaskRegistry::new().with("wait", move |ctx: TaskContext| {
        let flag = Arc::clone(&flag);
        async move {
            ctx.cancel.cancelled().await;
            *flag.lock().unwrap() = true;
            Outcome::failure("stopped")
        }
    });
    let launched = launch(test_options(1), Environment::default(), registry, Box::new(MemoryStore::new()));

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let handle = launched
        .client
        .submit(linear_chain("img", &["wait"]), UniquenessPolicy::Replace)
        .await?;
    wait_state(&mut sub, handle.chain_id, ChainState::Running).await;
    launched.client.cancel("img").await?;
    wait_state(&mut sub, handle.chain_id, ChainState::Cancelled).await;

    with_timeout(async {
        while !*observed.lock().unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn environment_change_unblocks_constrained_node() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();
    let launched = launch_with(
        test_options(1),
        Environment::default().with_storage_low(true),
        {
            let log = log.clone();
            move |tx| ScriptedExecutor::forwarding(tx, log)
        },
        Box::new(MemoryStore::new()),
    );

    let builder = ChainBuilder::begin("img", TaskSpec::new("blur"))
        .then(TaskSpec::new("save").constraint("storage_not_low"));
    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let handle = launched
        .client
        .submit_builder(builder, UniquenessPolicy::Replace)
        .await?;

    with_timeout(log.wait_for_dispatches(1)).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(log.dispatched_kinds(), vec!["blur"]);
    assert_eq!(
        launched.client.latest("img").map(|s| s.state),
        Some(ChainState::Running)
    );

    launched.client.set_environment(Environment::default()).await?;
    wait_state(&mut sub, handle.chain_id, ChainState::Succeeded).await;
    assert_eq!(log.dispatched_kinds(), vec!["blur", "save"]);

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn chains_are_recovered_from_the_store() -> TestResult {
    init_tracing();
    let store = MemoryStore::new();

    // First runtime: `a` succeeds, `b` is held when the runtime stops.
    let gate = Gate::new();
    let first = launch_with(
        test_options(1),
        Environment::default(),
        {
            let gate = gate.clone();
            move |tx| ControllableExecutor::new(tx, gate)
        },
        Box::new(store.clone()),
    );
    let handle = first
        .client
        .submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Replace)
        .await?;
    with_timeout(gate.wait_kind("a")).await;
    gate.release_kind("a", Outcome::Success(Data::new().with("k", "v")));
    with_timeout(gate.wait_kind("b")).await;
    first.client.shutdown().await?;
    with_timeout(first.handle).await??;

    let record = store.get(handle.chain_id).ok_or("chain was not persisted")?;
    assert!(record.nodes.iter().any(|n| n.runtime.status == NodeStatus::Running));

    // Second runtime picks up where the first left off.
    let log = ExecutionLog::new();
    let second = launch_with(
        test_options(1),
        Environment::default(),
        {
            let log = log.clone();
            move |tx| ScriptedExecutor::forwarding(tx, log)
        },
        Box::new(store.clone()),
    );
    let mut sub = second.client.observe(ObserveTag::chain("img"));
    let done = wait_state(&mut sub, handle.chain_id, ChainState::Succeeded).await;

    assert_eq!(log.dispatched_kinds(), vec!["b"]);
    let redispatched = &log.dispatched()[0];
    assert_eq!(redispatched.attempt, 2);
    assert_eq!(redispatched.input.get_str("k"), Some("v"));
    assert_eq!(done.node(NodeId(0)).map(|n| n.attempt), Some(1));

    // New chains do not reuse recovered ids.
    let next = second
        .client
        .submit(linear_chain("other", &["x"]), UniquenessPolicy::Replace)
        .await?;
    assert!(next.chain_id > handle.chain_id);

    second.client.shutdown().await?;
    with_timeout(second.handle).await??;
    Ok(())
}

#[tokio::test]
async fn settled_chains_are_evicted_after_retention() -> TestResult {
    init_tracing();
    let store = MemoryStore::new();
    let log = ExecutionLog::new();
    let mut options = test_options(1);
    options.retention = Duration::from_millis(20);

    let launched = launch_with(
        options,
        Environment::default(),
        {
            let log = log.clone();
            move |tx| ScriptedExecutor::forwarding(tx, log)
        },
        Box::new(store.clone()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let handle = launched
        .client
        .submit(linear_chain("img", &["a"]), UniquenessPolicy::Replace)
        .await?;
    wait_state(&mut sub, handle.chain_id, ChainState::Succeeded).await;

    with_timeout(async {
        while launched.client.latest("img").is_some() || !store.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(store.load_all()?.is_empty());

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    Ok(())
}

#[tokio::test]
async fn runtime_keeps_serving_until_shutdown() -> TestResult {
    init_tracing();
    let log = ExecutionLog::new();

    let launched = launch_with(
        test_options(2),
        Environment::default(),
        {
            let log = log.clone();
            move |tx| ScriptedExecutor::forwarding(tx, log)
        },
        Box::new(MemoryStore::new()),
    );

    let mut sub = launched.client.observe(ObserveTag::chain("img"));
    let first = launched
        .client
        .submit(linear_chain("img", &["a", "b"]), UniquenessPolicy::Replace)
        .await?;
    wait_state(&mut sub, first.chain_id, ChainState::Succeeded).await;

    // Going idle does not stop the runtime.
    let second = launched
        .client
        .submit(linear_chain("img", &["c"]), UniquenessPolicy::Replace)
        .await?;
    wait_state(&mut sub, second.chain_id, ChainState::Succeeded).await;
    assert_eq!(log.dispatched_kinds(), vec!["a", "b", "c"]);

    launched.client.shutdown().await?;
    with_timeout(launched.handle).await??;
    assert!(launched.client.submit(linear_chain("late", &["a"]), UniquenessPolicy::Replace).await.is_err());
    Ok(())
}
