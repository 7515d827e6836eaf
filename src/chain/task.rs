// src/chain/task.rs

//! Task descriptors: one unit of deferred work inside a chain.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chain::data::{Data, DataValue};
use crate::constraints::Constraint;
use crate::types::BackoffPolicy;

/// Identifies which computation runs a task; resolved through the
/// [`TaskRegistry`](crate::exec::TaskRegistry) at dispatch time.
pub type TaskKind = String;

/// Node identifier, unique within its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Retry ceiling and backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts allowed, including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::Exponential,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(5 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy, initial_delay: Duration) -> Self {
        self.backoff = backoff;
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before the next attempt, given how many attempts have run.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let n = attempts_made.max(1);
        let delay = match self.backoff {
            BackoffPolicy::Linear => self.initial_delay.saturating_mul(n),
            BackoffPolicy::Exponential => match 2u32.checked_pow(n - 1) {
                Some(factor) => self.initial_delay.saturating_mul(factor),
                None => self.max_delay,
            },
        };
        delay.min(self.max_delay)
    }
}

/// Immutable description of one unit of deferred work.
///
/// Created by [`ChainBuilder`](crate::chain::ChainBuilder), which assigns
/// the [`NodeId`] and resolves constraint names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: NodeId,
    pub kind: TaskKind,
    /// Input template. Outputs of the previous stage are merged over it.
    pub input: Data,
    pub constraints: BTreeSet<Constraint>,
    pub tags: BTreeSet<String>,
    pub retry: RetryPolicy,
}

impl TaskDescriptor {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// A task as the client describes it, before it is placed in a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub(crate) kind: TaskKind,
    pub(crate) input: Data,
    pub(crate) constraints: Vec<String>,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) retry: Option<RetryPolicy>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<TaskKind>) -> Self {
        Self {
            kind: kind.into(),
            input: Data::new(),
            constraints: Vec::new(),
            tags: BTreeSet::new(),
            retry: None,
        }
    }

    /// Replace the whole input template.
    pub fn input(mut self, input: Data) -> Self {
        self.input = input;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.input.insert(key, value);
        self
    }

    /// Require a named constraint. The name is checked when the chain is built.
    pub fn constraint(mut self, name: impl Into<String>) -> Self {
        self.constraints.push(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}
