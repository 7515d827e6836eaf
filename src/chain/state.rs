// src/chain/state.rs

//! Node and chain states, and the reduction from one to the other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Runtime status of a single node.
///
/// `NotReady → Queued → Running → {Succeeded | Failed | Cancelled}`; a node
/// waiting out a retry backoff is back in `NotReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Predecessors unfinished, a constraint unmet, or waiting to retry.
    NotReady,
    /// Ready and waiting for an execution slot.
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::NotReady => "not_ready",
            NodeStatus::Queued => "queued",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
            NodeStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Aggregate state of a chain, derived from its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Nothing has been dispatched yet.
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainState::Succeeded | ChainState::Failed | ChainState::Cancelled
        )
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainState::Pending => "pending",
            ChainState::Running => "running",
            ChainState::Succeeded => "succeeded",
            ChainState::Failed => "failed",
            ChainState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Reduce node `(status, attempts)` pairs to a chain state.
///
/// - `Failed` if any node failed
/// - otherwise `Cancelled` if cancellation was requested
/// - otherwise `Succeeded` if every node succeeded
/// - otherwise `Pending` if no node has been dispatched yet
/// - otherwise `Running`
pub fn reduce<I>(nodes: I, cancel_requested: bool) -> ChainState
where
    I: IntoIterator<Item = (NodeStatus, u32)>,
{
    let mut any_failed = false;
    let mut all_succeeded = true;
    let mut any_dispatched = false;
    let mut empty = true;

    for (status, attempts) in nodes {
        empty = false;
        match status {
            NodeStatus::Failed => any_failed = true,
            NodeStatus::Succeeded => {}
            _ => all_succeeded = false,
        }
        if attempts > 0 || !matches!(status, NodeStatus::NotReady | NodeStatus::Queued) {
            any_dispatched = true;
        }
    }

    if any_failed {
        ChainState::Failed
    } else if cancel_requested {
        ChainState::Cancelled
    } else if all_succeeded && !empty {
        ChainState::Succeeded
    } else if !any_dispatched {
        ChainState::Pending
    } else {
        ChainState::Running
    }
}
