// src/engine/live.rs

//! State transitions of a single admitted chain.
//!
//! [`LiveChain`] pairs an immutable [`ChainGraph`] with one [`NodeRuntime`]
//! per node. Only the [`Dispatcher`](crate::engine::Dispatcher) calls the
//! mutating methods; everything else reads snapshots.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::bus::{ChainSnapshot, NodeSnapshot};
use crate::chain::state::reduce;
use crate::chain::{ChainGraph, ChainState, Data, NodeId, NodeStatus, TaskDescriptor};
use crate::engine::node::{NodeRuntime, ScheduledNode};
use crate::engine::{ChainId, NodeKey};
use crate::errors::NodeFailure;
use crate::store::{ChainRecord, NodeRecord};

/// Nodes touched by a chain cancellation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CancelEffect {
    /// Nodes that were waiting for a slot.
    pub dequeued: Vec<NodeId>,
    /// Nodes whose attempt is in flight and must be told to stop.
    pub running: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct LiveChain {
    id: ChainId,
    graph: ChainGraph,
    nodes: BTreeMap<NodeId, NodeRuntime>,
    cancel_requested: bool,
    seq: u64,
}

impl LiveChain {
    pub fn new(id: ChainId, graph: ChainGraph) -> Self {
        let nodes = graph.nodes().map(|n| (n.id, NodeRuntime::new())).collect();
        Self {
            id,
            graph,
            nodes,
            cancel_requested: false,
            seq: 0,
        }
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn graph(&self) -> &ChainGraph {
        &self.graph
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRuntime> {
        self.nodes.get(&id)
    }

    pub fn descriptor(&self, id: NodeId) -> Option<&TaskDescriptor> {
        self.graph.node(id)
    }

    pub fn status_of(&self, id: NodeId) -> Option<NodeStatus> {
        self.nodes.get(&id).map(|rt| rt.status)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn state(&self) -> ChainState {
        reduce(
            self.nodes.values().map(|rt| (rt.status, rt.attempt)),
            self.cancel_requested,
        )
    }

    /// Every node is terminal; nothing of this chain is in flight anymore.
    pub fn is_settled(&self) -> bool {
        self.nodes.values().all(|rt| rt.status.is_terminal())
    }

    /// A failure or cancellation means no further node may start.
    pub fn is_halted(&self) -> bool {
        self.cancel_requested
            || self
                .nodes
                .values()
                .any(|rt| rt.status == NodeStatus::Failed)
    }

    /// `NotReady` nodes whose whole predecessor stage has succeeded and that
    /// are not waiting out a retry backoff. Constraints are not checked here.
    pub fn ready_candidates(&self) -> Vec<NodeId> {
        if self.is_halted() {
            return Vec::new();
        }

        let mut ready = Vec::new();
        let stages = self.graph.stages();

        for (index, stage) in stages.iter().enumerate() {
            if index > 0 {
                let previous_done = stages[index - 1]
                    .nodes()
                    .iter()
                    .all(|n| self.status_of(n.id) == Some(NodeStatus::Succeeded));
                if !previous_done {
                    break;
                }
            }

            for node in stage.nodes() {
                if let Some(rt) = self.nodes.get(&node.id) {
                    if rt.status == NodeStatus::NotReady && !rt.awaiting_retry {
                        ready.push(node.id);
                    }
                }
            }
        }

        ready
    }

    /// The node's input template with every predecessor's output merged
    /// over it, in node order.
    pub fn resolved_input(&self, id: NodeId) -> Data {
        let mut input = self
            .graph
            .node(id)
            .map(|d| d.input.clone())
            .unwrap_or_default();

        for pred in self.graph.predecessors_of(id) {
            if let Some(output) = self.nodes.get(&pred.id).and_then(|rt| rt.output.as_ref()) {
                input.merge(output);
            }
        }

        input
    }

    pub fn mark_queued(&mut self, id: NodeId, input: Data) {
        if let Some(rt) = self.nodes.get_mut(&id) {
            rt.status = NodeStatus::Queued;
            // Input is fixed by the first queueing; retries reuse it.
            if rt.input.is_none() {
                rt.input = Some(input);
            }
            debug!(chain = %self.graph.name(), node = %id, "node queued");
            self.seq += 1;
        }
    }

    /// Move a queued node to `Running` and describe the attempt to execute.
    pub fn mark_running(&mut self, id: NodeId) -> Option<ScheduledNode> {
        let descriptor = self.graph.node(id)?;
        let rt = self.nodes.get_mut(&id)?;
        if rt.status != NodeStatus::Queued {
            warn!(
                chain = %self.graph.name(),
                node = %id,
                status = %rt.status,
                "refusing to start a node that is not queued"
            );
            return None;
        }

        rt.status = NodeStatus::Running;
        rt.attempt += 1;
        self.seq += 1;

        Some(ScheduledNode {
            key: NodeKey::new(self.id, id),
            chain: self.graph.name().to_string(),
            kind: descriptor.kind.clone(),
            input: rt.input.clone().unwrap_or_default(),
            attempt: rt.attempt,
            tags: descriptor.tags.clone(),
        })
    }

    pub fn mark_succeeded(&mut self, id: NodeId, output: Data) {
        if let Some(rt) = self.nodes.get_mut(&id) {
            rt.status = NodeStatus::Succeeded;
            rt.output = Some(output);
            rt.failure = None;
            self.seq += 1;
        }
    }

    /// Park a node in `NotReady` until its retry timer fires.
    pub fn mark_awaiting_retry(&mut self, id: NodeId) {
        if let Some(rt) = self.nodes.get_mut(&id) {
            rt.status = NodeStatus::NotReady;
            rt.awaiting_retry = true;
            self.seq += 1;
        }
    }

    /// Returns `false` if the node was not waiting for a retry (stale timer).
    pub fn clear_retry_wait(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(rt) if rt.status == NodeStatus::NotReady && rt.awaiting_retry => {
                rt.awaiting_retry = false;
                true
            }
            _ => false,
        }
    }

    /// Cancel a single node whose attempt came back after the chain halted.
    pub fn mark_cancelled(&mut self, id: NodeId) {
        if let Some(rt) = self.nodes.get_mut(&id) {
            rt.status = NodeStatus::Cancelled;
            rt.awaiting_retry = false;
            self.seq += 1;
        }
    }

    /// Fail a node and cancel every node of the chain that has not started,
    /// later stages and queued or blocked siblings alike. Running siblings
    /// are left alone. Returns the cancelled nodes.
    pub fn mark_failed(&mut self, id: NodeId, failure: NodeFailure) -> Vec<NodeId> {
        let mut cancelled = Vec::new();

        if let Some(rt) = self.nodes.get_mut(&id) {
            rt.status = NodeStatus::Failed;
            rt.failure = Some(failure);
        }

        for (node_id, rt) in self.nodes.iter_mut() {
            if matches!(rt.status, NodeStatus::NotReady | NodeStatus::Queued) {
                rt.status = NodeStatus::Cancelled;
                rt.awaiting_retry = false;
                cancelled.push(*node_id);
            }
        }

        debug!(
            chain = %self.graph.name(),
            node = %id,
            cascaded = cancelled.len(),
            "node failed; cancelled nodes that had not started"
        );
        self.seq += 1;
        cancelled
    }

    /// Request cancellation: every non-terminal node becomes `Cancelled`.
    pub fn cancel(&mut self) -> CancelEffect {
        let mut effect = CancelEffect::default();
        self.cancel_requested = true;

        for (node_id, rt) in self.nodes.iter_mut() {
            match rt.status {
                NodeStatus::Queued => effect.dequeued.push(*node_id),
                NodeStatus::Running => effect.running.push(*node_id),
                NodeStatus::NotReady => {}
                NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Cancelled => continue,
            }
            rt.status = NodeStatus::Cancelled;
            rt.awaiting_retry = false;
        }

        self.seq += 1;
        effect
    }

    /// Append another graph's stages after this chain's last stage.
    pub fn append(&mut self, graph: ChainGraph) -> Vec<NodeId> {
        let added = self.graph.append(graph);
        for id in &added {
            self.nodes.insert(*id, NodeRuntime::new());
        }
        self.seq += 1;
        added
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for (stage_index, stage) in self.graph.stages().iter().enumerate() {
            for descriptor in stage.nodes() {
                let Some(rt) = self.nodes.get(&descriptor.id) else {
                    continue;
                };
                nodes.push(NodeSnapshot {
                    id: descriptor.id,
                    kind: descriptor.kind.clone(),
                    stage: stage_index,
                    status: rt.status,
                    attempt: rt.attempt,
                    tags: descriptor.tags.clone(),
                    output: if rt.status == NodeStatus::Succeeded {
                        rt.output.clone()
                    } else {
                        None
                    },
                    failure: rt.failure.clone(),
                });
            }
        }

        ChainSnapshot {
            name: self.graph.name().to_string(),
            chain_id: self.id,
            state: self.state(),
            seq: self.seq,
            nodes,
        }
    }

    pub fn record(&self) -> ChainRecord {
        ChainRecord {
            chain_id: self.id,
            graph: self.graph.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|(id, rt)| NodeRecord {
                    id: *id,
                    runtime: rt.clone(),
                })
                .collect(),
            cancel_requested: self.cancel_requested,
            seq: self.seq,
        }
    }

    /// Rebuild a chain from a stored record.
    ///
    /// Attempts that were queued or in flight when the record was written
    /// did not report back, so those nodes return to `NotReady` and are
    /// dispatched again, unless the chain had already failed or been
    /// cancelled. Pending retry backoffs are dropped.
    pub fn from_record(record: ChainRecord) -> Self {
        let mut nodes: BTreeMap<NodeId, NodeRuntime> = record
            .nodes
            .into_iter()
            .map(|n| (n.id, n.runtime))
            .collect();

        for descriptor in record.graph.nodes() {
            nodes.entry(descriptor.id).or_default();
        }

        for rt in nodes.values_mut() {
            if matches!(rt.status, NodeStatus::Queued | NodeStatus::Running) {
                rt.status = NodeStatus::NotReady;
            }
            rt.awaiting_retry = false;
        }

        let mut chain = Self {
            id: record.chain_id,
            graph: record.graph,
            nodes,
            cancel_requested: record.cancel_requested,
            seq: record.seq,
        };

        // Nothing of a halted chain will start again.
        if chain.is_halted() {
            for rt in chain.nodes.values_mut() {
                if !rt.status.is_terminal() {
                    rt.status = NodeStatus::Cancelled;
                }
            }
        }
        chain
    }
}
