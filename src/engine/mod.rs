// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the dispatcher, the single owner of every live chain's state
//! - the admission queue that bounds how many attempts run at once
//! - the runtime event loop that reacts to:
//!   - submissions and cancellations from clients
//!   - attempt completions from the executor
//!   - environment changes (constraint signals)
//!   - retry and eviction timers
//!   - shutdown requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; clients talk to it through [`client`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::chain::{ChainGraph, ChainName, Data, NodeId, Resolution};
use crate::constraints::Environment;
use crate::types::UniquenessPolicy;

/// Dispatcher-assigned identity of one admitted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Globally unique address of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub chain: ChainId,
    pub node: NodeId,
}

impl NodeKey {
    pub fn new(chain: ChainId, node: NodeId) -> Self {
        Self { chain, node }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.node)
    }
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Data),
    Failure(String),
    Retry(String),
}

impl Outcome {
    /// Success with no output.
    pub fn done() -> Self {
        Outcome::Success(Data::new())
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }

    pub fn retry(reason: impl Into<String>) -> Self {
        Outcome::Retry(reason.into())
    }
}

/// What `submit` hands back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHandle {
    pub name: ChainName,
    /// The chain that now owns the name: the new one, or for `Reject` and
    /// `Append` the one that was already in flight.
    pub chain_id: ChainId,
    pub resolution: Resolution,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Number of attempts that may run concurrently.
    pub workers: usize,
    /// How long a settled chain stays readable before it is evicted.
    pub retention: Duration,
    /// How long a cancelled attempt may take to wind down before it is aborted.
    pub cancel_grace: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            retention: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(2),
        }
    }
}

/// Events consumed by the pure core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Submit {
        chain: ChainGraph,
        policy: UniquenessPolicy,
    },
    Cancel {
        name: ChainName,
    },
    /// An attempt finished (or was wound down after cancellation).
    NodeCompleted {
        node: NodeKey,
        attempt: u32,
        outcome: Outcome,
    },
    EnvironmentChanged(Environment),
    /// A retry backoff elapsed.
    RetryDue {
        node: NodeKey,
    },
    /// A settled chain's retention window elapsed.
    EvictionDue {
        chain: ChainId,
    },
    ShutdownRequested,
}

/// Events flowing into the runtime from clients, the executor and timers.
#[derive(Debug)]
pub enum RuntimeEvent {
    Submit {
        chain: ChainGraph,
        policy: UniquenessPolicy,
        reply: oneshot::Sender<ChainHandle>,
    },
    /// `reply` fires once the cancellation has been applied and published.
    Cancel {
        name: ChainName,
        reply: Option<oneshot::Sender<()>>,
    },
    NodeCompleted {
        node: NodeKey,
        attempt: u32,
        outcome: Outcome,
    },
    EnvironmentChanged(Environment),
    RetryDue {
        node: NodeKey,
    },
    EvictionDue {
        chain: ChainId,
    },
    ShutdownRequested,
}

pub mod admission;
pub mod client;
pub mod core;
pub mod dispatcher;
pub mod event_handlers;
pub mod live;
pub mod node;
pub mod runtime;

pub use admission::AdmissionQueue;
pub use client::WorkClient;
pub use self::core::CoreRuntime;
pub use dispatcher::{DispatchStep, Dispatcher};
pub use event_handlers::{CoreCommand, CoreStep};
pub use live::LiveChain;
pub use node::{NodeRuntime, ScheduledNode};
pub use runtime::{launch, launch_with, Launched, Runtime};
