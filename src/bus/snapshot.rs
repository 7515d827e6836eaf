// src/bus/snapshot.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::chain::{ChainName, ChainState, Data, DataValue, NodeId, NodeStatus, TaskKind};
use crate::engine::ChainId;
use crate::errors::NodeFailure;

/// What an observer is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ObserveTag {
    /// Every transition of chains with this name.
    Chain(ChainName),
    /// Every transition of chains that hold at least one node with this tag.
    Tag(String),
}

impl ObserveTag {
    pub fn chain(name: impl Into<ChainName>) -> Self {
        ObserveTag::Chain(name.into())
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        ObserveTag::Tag(tag.into())
    }

    pub fn matches(&self, snapshot: &ChainSnapshot) -> bool {
        match self {
            ObserveTag::Chain(name) => snapshot.name == *name,
            ObserveTag::Tag(tag) => snapshot.nodes.iter().any(|n| n.tags.contains(tag)),
        }
    }
}

/// Point-in-time view of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: TaskKind,
    pub stage: usize,
    pub status: NodeStatus,
    pub attempt: u32,
    pub tags: BTreeSet<String>,
    /// Present only once the node has succeeded.
    pub output: Option<Data>,
    pub failure: Option<NodeFailure>,
}

/// Point-in-time view of a whole chain, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub name: ChainName,
    pub chain_id: ChainId,
    pub state: ChainState,
    /// Increases by one with every transition of this chain.
    pub seq: u64,
    pub nodes: Vec<NodeSnapshot>,
}

impl ChainSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The value a succeeded, tagged node produced under `key`.
    ///
    /// `None` while the node is still in flight or if it did not succeed,
    /// so a failed chain never exposes partial output.
    pub fn output_of(&self, tag: &str, key: &str) -> Option<&DataValue> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Succeeded && n.tags.contains(tag))
            .find_map(|n| n.output.as_ref().and_then(|d| d.get(key)))
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.nodes.iter().filter(|n| n.status == status).count()
    }
}
