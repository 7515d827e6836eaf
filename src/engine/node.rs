// src/engine/node.rs

//! Per-node runtime state and the dispatch unit handed to executors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::chain::{ChainName, Data, NodeStatus, TaskKind};
use crate::engine::NodeKey;
use crate::errors::NodeFailure;

/// Mutable state of one node, owned by its [`LiveChain`](crate::engine::LiveChain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRuntime {
    pub status: NodeStatus,
    /// Attempts dispatched so far.
    pub attempt: u32,
    /// Input resolved when the node was first queued; fixed from then on.
    pub input: Option<Data>,
    /// Present only once the node has succeeded.
    pub output: Option<Data>,
    pub failure: Option<NodeFailure>,
    /// `NotReady` because a retry backoff is pending.
    #[serde(default)]
    pub awaiting_retry: bool,
}

impl NodeRuntime {
    pub fn new() -> Self {
        Self {
            status: NodeStatus::NotReady,
            attempt: 0,
            input: None,
            output: None,
            failure: None,
            awaiting_retry: false,
        }
    }
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Description of a node attempt that the dispatcher wants executed now.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledNode {
    pub key: NodeKey,
    pub chain: ChainName,
    pub kind: TaskKind,
    pub input: Data,
    /// 1-based attempt number; completions must echo it back.
    pub attempt: u32,
    pub tags: BTreeSet<String>,
}
