use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use workchain::engine::{NodeKey, Outcome, RuntimeEvent, ScheduledNode};
use workchain::errors::Result;
use workchain::exec::ExecutorBackend;

/// Shared record of what an executor was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    dispatched: Arc<Mutex<Vec<ScheduledNode>>>,
    cancelled: Arc<Mutex<Vec<NodeKey>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched(&self) -> Vec<ScheduledNode> {
        self.dispatched.lock().unwrap().clone()
    }

    /// Task types in dispatch order.
    pub fn dispatched_kinds(&self) -> Vec<String> {
        self.dispatched().into_iter().map(|n| n.kind).collect()
    }

    pub fn cancelled(&self) -> Vec<NodeKey> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Poll until at least `n` attempts were dispatched.
    pub async fn wait_for_dispatches(&self, n: usize) {
        while self.dispatched.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record_dispatch(&self, node: &ScheduledNode) {
        self.dispatched.lock().unwrap().push(node.clone());
    }

    fn record_cancel(&self, key: NodeKey) {
        self.cancelled.lock().unwrap().push(key);
    }
}

type Script = dyn Fn(&ScheduledNode) -> Outcome + Send + Sync;

/// A fake executor that:
/// - records which nodes were dispatched
/// - immediately reports the outcome chosen by `script` for each of them.
pub struct ScriptedExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    log: ExecutionLog,
    script: Arc<Script>,
}

impl ScriptedExecutor {
    pub fn new<F>(runtime_tx: mpsc::Sender<RuntimeEvent>, log: ExecutionLog, script: F) -> Self
    where
        F: Fn(&ScheduledNode) -> Outcome + Send + Sync + 'static,
    {
        Self {
            runtime_tx,
            log,
            script: Arc::new(script),
        }
    }

    /// Every attempt succeeds and forwards its input as output.
    pub fn forwarding(runtime_tx: mpsc::Sender<RuntimeEvent>, log: ExecutionLog) -> Self {
        Self::new(runtime_tx, log, |node| Outcome::Success(node.input.clone()))
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn dispatch(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let log = self.log.clone();
        let script = Arc::clone(&self.script);

        Box::pin(async move {
            for node in nodes {
                log.record_dispatch(&node);
                let outcome = script(&node);
                let tx = tx.clone();
                // Report from a separate task; the runtime loop is busy
                // executing this very command.
                tokio::spawn(async move {
                    let _ = tx
                        .send(RuntimeEvent::NodeCompleted {
                            node: node.key,
                            attempt: node.attempt,
                            outcome,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        nodes: Vec<NodeKey>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let log = self.log.clone();
        Box::pin(async move {
            for key in nodes {
                log.record_cancel(key);
            }
            Ok(())
        })
    }
}

struct Held {
    key: NodeKey,
    kind: String,
    release: oneshot::Sender<Outcome>,
}

/// Handle used by a test to finish attempts held by a [`ControllableExecutor`].
#[derive(Clone, Default)]
pub struct Gate {
    held: Arc<Mutex<Vec<Held>>>,
    log: ExecutionLog,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Keys of attempts that are dispatched and not yet released.
    pub fn running(&self) -> Vec<NodeKey> {
        self.held.lock().unwrap().iter().map(|h| h.key).collect()
    }

    pub fn running_kinds(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().map(|h| h.kind.clone()).collect()
    }

    /// Finish the attempt of `key` with `outcome`.
    pub fn release(&self, key: NodeKey, outcome: Outcome) -> bool {
        let mut held = self.held.lock().unwrap();
        match held.iter().position(|h| h.key == key) {
            Some(index) => held.remove(index).release.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Finish the oldest held attempt of task type `kind`.
    pub fn release_kind(&self, kind: &str, outcome: Outcome) -> bool {
        let mut held = self.held.lock().unwrap();
        match held.iter().position(|h| h.kind == kind) {
            Some(index) => held.remove(index).release.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Poll until at least `n` attempts are held.
    pub async fn wait_running(&self, n: usize) {
        while self.held.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until an attempt of `kind` is held.
    pub async fn wait_kind(&self, kind: &str) {
        while !self.held.lock().unwrap().iter().any(|h| h.kind == kind) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// A fake executor whose attempts only finish when the test releases them
/// through the shared [`Gate`]. Cancelled attempts finish right away.
pub struct ControllableExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    gate: Gate,
}

impl ControllableExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, gate: Gate) -> Self {
        Self { runtime_tx, gate }
    }
}

impl ExecutorBackend for ControllableExecutor {
    fn dispatch(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let gate = self.gate.clone();

        Box::pin(async move {
            for node in nodes {
                gate.log.record_dispatch(&node);

                let (release, wait) = oneshot::channel();
                gate.held.lock().unwrap().push(Held {
                    key: node.key,
                    kind: node.kind.clone(),
                    release,
                });

                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = wait
                        .await
                        .unwrap_or_else(|_| Outcome::failure("released without outcome"));
                    let _ = tx
                        .send(RuntimeEvent::NodeCompleted {
                            node: node.key,
                            attempt: node.attempt,
                            outcome,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        nodes: Vec<NodeKey>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let gate = self.gate.clone();

        Box::pin(async move {
            for key in nodes {
                gate.log.record_cancel(key);
                gate.release(key, Outcome::failure("cancelled"));
            }
            Ok(())
        })
    }
}
