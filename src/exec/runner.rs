// src/exec/runner.rs

//! Fault-isolating execution of one attempt.

use std::any::Any;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::node::ScheduledNode;
use crate::engine::{Outcome, RuntimeEvent};
use crate::exec::registry::{TaskContext, TaskRegistry};

/// Run one attempt of `node` and report its outcome to the runtime.
///
/// - The computation runs in its own Tokio task, so a panic becomes a
///   `Failure` instead of taking the executor down.
/// - If `signal` fires, the computation gets `grace` to return on its own
///   before it is aborted.
/// - A `NodeCompleted` event is sent in every case so the slot is released.
pub async fn run_node(
    node: ScheduledNode,
    registry: &TaskRegistry,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    signal: CancellationToken,
    grace: Duration,
) {
    let key = node.key;
    let attempt = node.attempt;
    let outcome = execute(node, registry, signal, grace).await;

    debug!(node = %key, attempt, ?outcome, "attempt finished");

    if runtime_tx
        .send(RuntimeEvent::NodeCompleted {
            node: key,
            attempt,
            outcome,
        })
        .await
        .is_err()
    {
        debug!(node = %key, attempt, "runtime gone; dropping completion");
    }
}

async fn execute(
    node: ScheduledNode,
    registry: &TaskRegistry,
    signal: CancellationToken,
    grace: Duration,
) -> Outcome {
    let Some(computation) = registry.get(&node.kind) else {
        warn!(node = %node.key, kind = %node.kind, "no computation registered");
        return Outcome::failure(format!(
            "no computation registered for task type '{}'",
            node.kind
        ));
    };

    info!(
        chain = %node.chain,
        node = %node.key,
        kind = %node.kind,
        attempt = node.attempt,
        "starting attempt"
    );

    let ctx = TaskContext {
        node: node.key,
        chain: node.chain,
        kind: node.kind,
        input: node.input,
        attempt: node.attempt,
        tags: node.tags,
        cancel: signal.child_token(),
    };

    // `run` itself is called inside the task so a panic while building the
    // future is caught as well.
    let mut handle = tokio::spawn(async move { computation.run(ctx).await });

    tokio::select! {
        joined = &mut handle => outcome_from_join(joined),

        () = signal.cancelled() => {
            info!(node = %node.key, "cancellation requested; waiting for computation to stop");
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => outcome_from_join(joined),
                Err(_) => {
                    warn!(
                        node = %node.key,
                        grace_ms = grace.as_millis() as u64,
                        "computation ignored cancellation; aborting"
                    );
                    handle.abort();
                    Outcome::failure("cancelled")
                }
            }
        }
    }
}

fn outcome_from_join(joined: Result<Outcome, JoinError>) -> Outcome {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic());
            warn!(panic = %message, "computation panicked");
            Outcome::failure(format!("computation panicked: {message}"))
        }
        Err(_) => Outcome::failure("computation aborted"),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
