// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bus::StateBus;
use crate::constraints::Environment;
use crate::engine::client::WorkClient;
use crate::engine::core::CoreRuntime;
use crate::engine::event_handlers::CoreCommand;
use crate::engine::node::ScheduledNode;
use crate::engine::{ChainHandle, CoreEvent, RuntimeEvent, RuntimeOptions};
use crate::errors::Result;
use crate::exec::{ExecutorBackend, RealExecutorBackend, TaskRegistry};
use crate::store::ChainStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Where the answer to a client request goes once its event is applied.
enum Reply {
    None,
    Submit(oneshot::Sender<ChainHandle>),
    Cancel(oneshot::Sender<()>),
}

/// Drives the dispatcher in response to `RuntimeEvent`s and carries out the
/// commands it produces.
///
/// This is a pure IO shell around [`CoreRuntime`], which contains all the
/// orchestration semantics. This struct reads events from the channel,
/// talks to the `ExecutorBackend`, arms timers, persists chains to the
/// `ChainStore` and publishes snapshots on the `StateBus`.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Timers must not keep the runtime alive on their own.
    timer_tx: mpsc::WeakSender<RuntimeEvent>,
    executor: E,
    store: Box<dyn ChainStore>,
    bus: StateBus,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        timer_tx: mpsc::WeakSender<RuntimeEvent>,
        executor: E,
        store: Box<dyn ChainStore>,
        bus: StateBus,
    ) -> Self {
        Self {
            core,
            event_rx,
            timer_tx,
            executor,
            store,
            bus,
        }
    }

    /// Main event loop.
    ///
    /// - Restores chains from the store.
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes the returned commands, then answers the client (if any).
    pub async fn run(mut self) -> Result<()> {
        info!(
            workers = self.core.options().workers,
            "workchain runtime started"
        );

        self.recover().await?;

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let (event, reply) = split(event);
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            match reply {
                Reply::Submit(tx) => {
                    if let Some(handle) = step.handle {
                        let _ = tx.send(handle);
                    }
                }
                Reply::Cancel(tx) => {
                    let _ = tx.send(());
                }
                Reply::None => {}
            }

            if !step.keep_running {
                info!("shutdown requested; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn recover(&mut self) -> Result<()> {
        let records = match self.store.load_all() {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "failed to load stored chains; starting empty");
                return Ok(());
            }
        };
        if records.is_empty() {
            return Ok(());
        }

        info!(chains = records.len(), "recovering stored chains");
        let step = self.core.restore(records);
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Persist(records) => {
                for record in &records {
                    if let Err(err) = self.store.save(record) {
                        error!(
                            chain = %record.graph.name(),
                            chain_id = %record.chain_id,
                            error = %err,
                            "failed to persist chain"
                        );
                    }
                }
            }
            CoreCommand::Publish(snapshots) => {
                for snapshot in snapshots {
                    self.bus.publish(snapshot);
                }
            }
            CoreCommand::CancelNodes(nodes) => {
                debug!(?nodes, "cancelling in-flight nodes");
                self.executor.cancel(nodes).await?;
            }
            CoreCommand::DispatchNodes(nodes) => {
                self.dispatch(nodes).await?;
            }
            CoreCommand::ScheduleRetry { node, delay } => {
                self.schedule(delay, RuntimeEvent::RetryDue { node });
            }
            CoreCommand::ScheduleEviction { chain, after } => {
                self.schedule(after, RuntimeEvent::EvictionDue { chain });
            }
            CoreCommand::Forget { chain, name } => {
                if let Err(err) = self.store.remove(chain) {
                    error!(chain = %name, chain_id = %chain, error = %err, "failed to remove stored chain");
                }
                self.bus.forget(&name, chain);
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, nodes: Vec<ScheduledNode>) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let keys: Vec<_> = nodes.iter().map(|n| n.key.to_string()).collect();
        debug!(?keys, "dispatching nodes");

        self.executor.dispatch(nodes).await
    }

    /// Deliver `event` back to this loop after `delay`.
    fn schedule(&self, delay: Duration, event: RuntimeEvent) {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(event).await;
            }
        });
    }
}

fn split(event: RuntimeEvent) -> (CoreEvent, Reply) {
    match event {
        RuntimeEvent::Submit {
            chain,
            policy,
            reply,
        } => (CoreEvent::Submit { chain, policy }, Reply::Submit(reply)),
        RuntimeEvent::Cancel { name, reply } => (
            CoreEvent::Cancel { name },
            reply.map_or(Reply::None, Reply::Cancel),
        ),
        RuntimeEvent::NodeCompleted {
            node,
            attempt,
            outcome,
        } => (
            CoreEvent::NodeCompleted {
                node,
                attempt,
                outcome,
            },
            Reply::None,
        ),
        RuntimeEvent::EnvironmentChanged(env) => (CoreEvent::EnvironmentChanged(env), Reply::None),
        RuntimeEvent::RetryDue { node } => (CoreEvent::RetryDue { node }, Reply::None),
        RuntimeEvent::EvictionDue { chain } => (CoreEvent::EvictionDue { chain }, Reply::None),
        RuntimeEvent::ShutdownRequested => (CoreEvent::ShutdownRequested, Reply::None),
    }
}

/// A running runtime and the handles needed to talk to it.
#[derive(Debug)]
pub struct Launched {
    pub client: WorkClient,
    pub bus: StateBus,
    /// Resolves when the runtime loop exits.
    pub handle: JoinHandle<Result<()>>,
}

/// Spawn a runtime that executes nodes with the computations in `registry`.
pub fn launch(
    options: RuntimeOptions,
    environment: Environment,
    registry: TaskRegistry,
    store: Box<dyn ChainStore>,
) -> Launched {
    let registry = Arc::new(registry);
    launch_with(
        options,
        environment,
        move |tx| RealExecutorBackend::new(tx, registry, options.cancel_grace),
        store,
    )
}

/// Spawn a runtime around a custom executor backend.
///
/// `make_executor` receives the sender the backend must report
/// `NodeCompleted` events on.
pub fn launch_with<E, F>(
    options: RuntimeOptions,
    environment: Environment,
    make_executor: F,
    store: Box<dyn ChainStore>,
) -> Launched
where
    E: ExecutorBackend + 'static,
    F: FnOnce(mpsc::Sender<RuntimeEvent>) -> E,
{
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(EVENT_CHANNEL_CAPACITY);
    let bus = StateBus::new();

    let executor = make_executor(tx.clone());
    let core = CoreRuntime::new(options, environment);
    let runtime = Runtime::new(core, rx, tx.downgrade(), executor, store, bus.clone());

    let handle = tokio::spawn(runtime.run());

    Launched {
        client: WorkClient::new(tx, bus.clone()),
        bus,
        handle,
    }
}
