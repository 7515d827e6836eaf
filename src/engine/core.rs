// src/engine/core.rs

//! Synchronous heart of the engine.
//!
//! [`CoreRuntime`] folds one [`CoreEvent`] at a time into the dispatcher and
//! answers with a [`CoreStep`]: the commands the async
//! [`Runtime`](crate::engine::Runtime) must carry out and the reply for
//! whoever sent the event.
//!
//! Nothing here touches Tokio, the store or a computation, so every
//! chain-level rule is testable by feeding events directly.

use crate::constraints::Environment;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::event_handlers::{
    handle_cancel, handle_environment_change, handle_eviction, handle_node_completion,
    handle_retry_due, handle_submit, into_commands, CoreStep,
};
use crate::engine::{CoreEvent, RuntimeOptions};
use crate::store::ChainRecord;

/// Dispatcher plus options. Owns no channels and performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    dispatcher: Dispatcher,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(options: RuntimeOptions, environment: Environment) -> Self {
        Self {
            dispatcher: Dispatcher::new(options.workers, environment),
            options,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Re-admit chains loaded from a store at startup.
    pub fn restore(&mut self, records: Vec<ChainRecord>) -> CoreStep {
        let step = self.dispatcher.restore(records);
        CoreStep {
            commands: into_commands(&self.dispatcher, &self.options, step),
            handle: None,
            keep_running: true,
        }
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        match event {
            CoreEvent::Submit { chain, policy } => {
                handle_submit(&mut self.dispatcher, &self.options, chain, policy)
            }
            CoreEvent::Cancel { name } => handle_cancel(&mut self.dispatcher, &self.options, &name),
            CoreEvent::NodeCompleted {
                node,
                attempt,
                outcome,
            } => handle_node_completion(&mut self.dispatcher, &self.options, node, attempt, outcome),
            CoreEvent::EnvironmentChanged(environment) => {
                handle_environment_change(&mut self.dispatcher, &self.options, environment)
            }
            CoreEvent::RetryDue { node } => {
                handle_retry_due(&mut self.dispatcher, &self.options, node)
            }
            CoreEvent::EvictionDue { chain } => handle_eviction(&mut self.dispatcher, chain),
            CoreEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                handle: None,
                keep_running: false,
            },
        }
    }
}
