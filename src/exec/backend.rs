// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests.
//!
//! - `RealExecutorBackend` is the default implementation. It wraps the
//!   [`spawn_executor`] loop and forwards commands over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which nodes were dispatched and directly emits `NodeCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::engine::node::ScheduledNode;
use crate::engine::{NodeKey, RuntimeEvent};
use crate::errors::{Error, Result};
use crate::exec::executor_loop::{spawn_executor, ExecutorCommand};
use crate::exec::registry::TaskRegistry;

/// Trait abstracting how attempts are executed.
pub trait ExecutorBackend: Send {
    /// Start the given attempts. Each must eventually be answered by a
    /// `RuntimeEvent::NodeCompleted` carrying the same attempt number.
    fn dispatch(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Ask in-flight attempts to stop. They still report completion.
    fn cancel(
        &mut self,
        nodes: Vec<NodeKey>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorCommand>,
}

impl RealExecutorBackend {
    /// Spawns the background executor loop immediately.
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        registry: Arc<TaskRegistry>,
        cancel_grace: Duration,
    ) -> Self {
        let tx = spawn_executor(runtime_tx, registry, cancel_grace);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        nodes: Vec<ScheduledNode>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for node in nodes {
                tx.send(ExecutorCommand::Run(node)).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        nodes: Vec<NodeKey>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            for key in nodes {
                tx.send(ExecutorCommand::Cancel(key)).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
