// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.
//!
//! Every handler feeds one input into the [`Dispatcher`] and translates the
//! resulting [`DispatchStep`] into [`CoreCommand`]s. Commands are ordered so
//! that state is persisted and published before any attempt is started or
//! stopped.

use std::time::Duration;

use tracing::debug;

use crate::chain::{ChainGraph, ChainName};
use crate::constraints::Environment;
use crate::engine::dispatcher::{DispatchStep, Dispatcher};
use crate::engine::node::ScheduledNode;
use crate::engine::{ChainHandle, ChainId, NodeKey, Outcome, RuntimeOptions};
use crate::bus::ChainSnapshot;
use crate::store::ChainRecord;
use crate::types::UniquenessPolicy;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Write these chains to the store.
    Persist(Vec<ChainRecord>),
    /// Publish these snapshots on the state bus.
    Publish(Vec<ChainSnapshot>),
    /// Ask the executor to stop these in-flight attempts.
    CancelNodes(Vec<NodeKey>),
    /// Send these attempts to the executor.
    DispatchNodes(Vec<ScheduledNode>),
    /// Fire `RetryDue` for `node` after `delay`.
    ScheduleRetry { node: NodeKey, delay: Duration },
    /// Fire `EvictionDue` for `chain` after `after`.
    ScheduleEviction { chain: ChainId, after: Duration },
    /// Drop an evicted chain from the store and the bus replay cache.
    Forget { chain: ChainId, name: ChainName },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Set for submissions.
    pub handle: Option<ChainHandle>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn idle() -> Self {
        Self {
            commands: Vec::new(),
            handle: None,
            keep_running: true,
        }
    }
}

pub fn handle_submit(
    dispatcher: &mut Dispatcher,
    options: &RuntimeOptions,
    chain: ChainGraph,
    policy: UniquenessPolicy,
) -> CoreStep {
    let (handle, step) = dispatcher.submit(chain, policy);
    debug!(
        chain = %handle.name,
        chain_id = %handle.chain_id,
        resolution = ?handle.resolution,
        "submission resolved"
    );

    CoreStep {
        commands: into_commands(dispatcher, options, step),
        handle: Some(handle),
        keep_running: true,
    }
}

pub fn handle_cancel(dispatcher: &mut Dispatcher, options: &RuntimeOptions, name: &str) -> CoreStep {
    let step = dispatcher.cancel(name);
    CoreStep {
        commands: into_commands(dispatcher, options, step),
        handle: None,
        keep_running: true,
    }
}

/// Handle an attempt completion.
pub fn handle_node_completion(
    dispatcher: &mut Dispatcher,
    options: &RuntimeOptions,
    node: NodeKey,
    attempt: u32,
    outcome: Outcome,
) -> CoreStep {
    let step = dispatcher.complete(node, attempt, outcome);
    CoreStep {
        commands: into_commands(dispatcher, options, step),
        handle: None,
        keep_running: true,
    }
}

pub fn handle_environment_change(
    dispatcher: &mut Dispatcher,
    options: &RuntimeOptions,
    environment: Environment,
) -> CoreStep {
    let step = dispatcher.set_environment(environment);
    CoreStep {
        commands: into_commands(dispatcher, options, step),
        handle: None,
        keep_running: true,
    }
}

pub fn handle_retry_due(dispatcher: &mut Dispatcher, options: &RuntimeOptions, node: NodeKey) -> CoreStep {
    let step = dispatcher.retry_due(node);
    CoreStep {
        commands: into_commands(dispatcher, options, step),
        handle: None,
        keep_running: true,
    }
}

pub fn handle_eviction(dispatcher: &mut Dispatcher, chain: ChainId) -> CoreStep {
    let mut step = CoreStep::idle();
    if let Some(name) = dispatcher.evict(chain) {
        step.commands.push(CoreCommand::Forget { chain, name });
    }
    step
}

/// Translate a dispatcher step into shell commands.
pub fn into_commands(
    dispatcher: &Dispatcher,
    options: &RuntimeOptions,
    step: DispatchStep,
) -> Vec<CoreCommand> {
    let mut commands = Vec::new();

    let records: Vec<_> = step
        .changed
        .iter()
        .filter_map(|id| dispatcher.record(*id))
        .collect();
    if !records.is_empty() {
        commands.push(CoreCommand::Persist(records));
    }

    let snapshots: Vec<_> = step
        .changed
        .iter()
        .filter_map(|id| dispatcher.snapshot(*id))
        .collect();
    if !snapshots.is_empty() {
        commands.push(CoreCommand::Publish(snapshots));
    }

    if !step.cancelled_running.is_empty() {
        commands.push(CoreCommand::CancelNodes(step.cancelled_running));
    }

    if !step.dispatched.is_empty() {
        commands.push(CoreCommand::DispatchNodes(step.dispatched));
    }

    for (node, delay) in step.retries {
        commands.push(CoreCommand::ScheduleRetry { node, delay });
    }

    for chain in step.settled {
        commands.push(CoreCommand::ScheduleEviction {
            chain,
            after: options.retention,
        });
    }

    commands
}
