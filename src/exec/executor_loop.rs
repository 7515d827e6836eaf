// src/exec/executor_loop.rs

//! Main executor loop that manages in-flight attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::node::ScheduledNode;
use crate::engine::{NodeKey, RuntimeEvent};
use crate::exec::registry::TaskRegistry;
use crate::exec::runner::run_node;

/// Instruction for the executor loop.
#[derive(Debug)]
pub enum ExecutorCommand {
    Run(ScheduledNode),
    Cancel(NodeKey),
}

/// Internal handle for an in-flight attempt.
///
/// - `token` asks the computation to stop.
/// - `handle` is the Tokio task running [`run_node`].
struct ActiveNode {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`RealExecutorBackend`](crate::exec::RealExecutorBackend)
/// forwards commands to. Each attempt runs in its own Tokio task; the
/// dispatcher bounds how many are in flight, so the loop itself does not.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    registry: Arc<TaskRegistry>,
    cancel_grace: Duration,
) -> mpsc::Sender<ExecutorCommand> {
    let (tx, mut rx) = mpsc::channel::<ExecutorCommand>(64);

    tokio::spawn(async move {
        info!(kinds = ?registry.kinds(), "executor loop started");

        let mut active: HashMap<NodeKey, ActiveNode> = HashMap::new();

        while let Some(command) = rx.recv().await {
            active.retain(|_, node| !node.handle.is_finished());

            match command {
                ExecutorCommand::Run(node) => {
                    start_node(node, &mut active, &registry, &runtime_tx, cancel_grace);
                }
                ExecutorCommand::Cancel(key) => cancel_node(key, &active),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn start_node(
    node: ScheduledNode,
    active: &mut HashMap<NodeKey, ActiveNode>,
    registry: &Arc<TaskRegistry>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    cancel_grace: Duration,
) {
    let key = node.key;
    let token = CancellationToken::new();
    let signal = token.clone();
    let registry = Arc::clone(registry);
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_node(node, &registry, rt_tx, signal, cancel_grace).await;
        debug!(node = %key, "node runner future finished");
    });

    active.insert(key, ActiveNode { token, handle });
}

fn cancel_node(key: NodeKey, active: &HashMap<NodeKey, ActiveNode>) {
    match active.get(&key) {
        Some(node) if !node.token.is_cancelled() => {
            info!(node = %key, "cancelling in-flight attempt");
            node.token.cancel();
        }
        Some(_) => debug!(node = %key, "attempt already cancelled"),
        None => debug!(node = %key, "attempt already finished while cancelling"),
    }
}
