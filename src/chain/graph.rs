// src/chain/graph.rs

use serde::{Deserialize, Serialize};

use crate::chain::task::{NodeId, TaskDescriptor};

/// Externally meaningful chain identity; the uniqueness scope.
pub type ChainName = String;

/// One step of a chain: a single task, or several independent tasks (a
/// "fan" stage) that may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    nodes: Vec<TaskDescriptor>,
}

impl Stage {
    pub(crate) fn new(nodes: Vec<TaskDescriptor>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TaskDescriptor] {
        &self.nodes
    }
}

/// A named, strictly sequential list of stages.
///
/// Stage `n + 1` depends on every node of stage `n`; nodes inside a stage do
/// not depend on each other. Built through
/// [`ChainBuilder`](crate::chain::ChainBuilder), which guarantees every
/// stage is non-empty and node ids are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainGraph {
    name: ChainName,
    stages: Vec<Stage>,
}

impl ChainGraph {
    /// Assumes the stages were validated by the builder.
    pub(crate) fn new_unchecked(name: ChainName, stages: Vec<Stage>) -> Self {
        Self { name, stages }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// All nodes in stage order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskDescriptor> {
        self.stages.iter().flat_map(|s| s.nodes.iter())
    }

    pub fn node_count(&self) -> usize {
        self.stages.iter().map(|s| s.nodes.len()).sum()
    }

    pub fn node(&self, id: NodeId) -> Option<&TaskDescriptor> {
        self.nodes().find(|n| n.id == id)
    }

    /// Index of the stage holding `id`.
    pub fn stage_of(&self, id: NodeId) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.nodes.iter().any(|n| n.id == id))
    }

    /// Nodes that must all succeed before `id` may start (the previous stage).
    pub fn predecessors_of(&self, id: NodeId) -> &[TaskDescriptor] {
        match self.stage_of(id) {
            Some(0) | None => &[],
            Some(i) => self.stages[i - 1].nodes(),
        }
    }

    /// Nodes that wait on `id` (the next stage).
    pub fn successors_of(&self, id: NodeId) -> &[TaskDescriptor] {
        match self.stage_of(id) {
            Some(i) if i + 1 < self.stages.len() => self.stages[i + 1].nodes(),
            _ => &[],
        }
    }

    /// Nodes carrying `tag`.
    pub fn tagged<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a TaskDescriptor> + 'a {
        self.nodes().filter(move |n| n.has_tag(tag))
    }

    /// Concatenate `other`'s stages after ours, renumbering its node ids so
    /// they stay unique within this chain. Returns the ids given to the
    /// appended nodes, in stage order.
    pub(crate) fn append(&mut self, other: ChainGraph) -> Vec<NodeId> {
        let mut next = self.nodes().map(|n| n.id.0 + 1).max().unwrap_or(0);
        let mut added = Vec::new();

        for stage in other.stages {
            let nodes = stage
                .nodes
                .into_iter()
                .map(|mut node| {
                    node.id = NodeId(next);
                    next += 1;
                    added.push(node.id);
                    node
                })
                .collect();
            self.stages.push(Stage::new(nodes));
        }

        added
    }
}
