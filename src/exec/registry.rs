// src/exec/registry.rs

//! Task registry: task type → computation.
//!
//! Collaborators register their computations at startup. The runner looks
//! the computation up by the node's task type when the attempt starts.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::{ChainName, Data, TaskKind};
use crate::engine::{NodeKey, Outcome};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Everything a computation gets to see about its attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub node: NodeKey,
    pub chain: ChainName,
    pub kind: TaskKind,
    /// Template merged with the predecessor stage's outputs.
    pub input: Data,
    /// 1-based.
    pub attempt: u32,
    pub tags: BTreeSet<String>,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get_str(key)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A unit of deferred work.
pub trait Computation: Send + Sync + 'static {
    fn run(&self, ctx: TaskContext) -> BoxFuture<Outcome>;
}

impl<F, Fut> Computation for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn run(&self, ctx: TaskContext) -> BoxFuture<Outcome> {
        Box::pin(self(ctx))
    }
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    computations: HashMap<TaskKind, Arc<dyn Computation>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `computation` under `kind`, replacing any earlier one.
    pub fn register<C: Computation>(&mut self, kind: impl Into<TaskKind>, computation: C) {
        self.computations.insert(kind.into(), Arc::new(computation));
    }

    pub fn with<C: Computation>(mut self, kind: impl Into<TaskKind>, computation: C) -> Self {
        self.register(kind, computation);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Computation>> {
        self.computations.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.computations.contains_key(kind)
    }

    /// Registered task types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.computations.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
