// src/chain/builder.rs

//! Chain construction.
//!
//! ```
//! use workchain::chain::{ChainBuilder, TaskSpec};
//!
//! let mut builder = ChainBuilder::begin("img", TaskSpec::new("blur").with_input("image_uri", "in.png"));
//! for _ in 1..3 {
//!     builder = builder.then(TaskSpec::new("blur"));
//! }
//! let chain = builder
//!     .then(TaskSpec::new("save_image").constraint("storage_not_low").tag("output"))
//!     .then(TaskSpec::new("cleanup"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(chain.stage_count(), 5);
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::chain::graph::{ChainGraph, ChainName, Stage};
use crate::chain::task::{NodeId, RetryPolicy, TaskDescriptor, TaskSpec};
use crate::constraints::Constraint;
use crate::errors::{Result, WorkchainError};

/// Accumulates stages for a chain until [`build`](ChainBuilder::build) fixes
/// the order and assigns node ids.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    name: ChainName,
    stages: Vec<Vec<TaskSpec>>,
    default_retry: RetryPolicy,
}

impl ChainBuilder {
    /// Start an empty builder. At least one stage must be added before build.
    pub fn new(name: impl Into<ChainName>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            default_retry: RetryPolicy::default(),
        }
    }

    /// Start a chain whose first stage is a single task.
    pub fn begin(name: impl Into<ChainName>, first: TaskSpec) -> Self {
        Self::new(name).then(first)
    }

    /// Start a chain whose first stage is a fan of independent tasks.
    pub fn begin_with(name: impl Into<ChainName>, first: Vec<TaskSpec>) -> Self {
        Self::new(name).then_all(first)
    }

    /// Append a single-task stage.
    pub fn then(mut self, task: TaskSpec) -> Self {
        self.stages.push(vec![task]);
        self
    }

    /// Append a fan stage. An empty vector is accepted here and rejected by
    /// [`build`](ChainBuilder::build).
    pub fn then_all(mut self, tasks: Vec<TaskSpec>) -> Self {
        self.stages.push(tasks);
        self
    }

    /// Retry policy for tasks that do not set their own.
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Validate and freeze the chain.
    ///
    /// Fails with [`WorkchainError::InvalidChain`] when:
    /// - the name is blank
    /// - there are no stages, or any stage is empty
    /// - a task has a blank type
    /// - a constraint name is unknown
    /// - a retry policy allows zero attempts
    pub fn build(self) -> Result<ChainGraph> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("chain name must not be empty"));
        }
        if self.stages.is_empty() {
            return Err(invalid(format!("chain '{name}' has no stages")));
        }

        let mut next_id = 0u32;
        let mut stages = Vec::with_capacity(self.stages.len());

        for (index, specs) in self.stages.into_iter().enumerate() {
            if specs.is_empty() {
                return Err(invalid(format!("chain '{name}': stage {index} is empty")));
            }

            let mut nodes = Vec::with_capacity(specs.len());
            for spec in specs {
                let descriptor = descriptor_from_spec(&name, index, NodeId(next_id), spec, self.default_retry)?;
                next_id += 1;
                nodes.push(descriptor);
            }
            stages.push(Stage::new(nodes));
        }

        Ok(ChainGraph::new_unchecked(name, stages))
    }
}

fn descriptor_from_spec(
    chain: &str,
    stage: usize,
    id: NodeId,
    spec: TaskSpec,
    default_retry: RetryPolicy,
) -> Result<TaskDescriptor> {
    if spec.kind.trim().is_empty() {
        return Err(invalid(format!(
            "chain '{chain}': stage {stage} has a task with an empty type"
        )));
    }

    let mut constraints = BTreeSet::new();
    for name in &spec.constraints {
        let constraint = Constraint::from_str(name)
            .map_err(|e| invalid(format!("chain '{chain}', task '{}': {e}", spec.kind)))?;
        constraints.insert(constraint);
    }

    let retry = spec.retry.unwrap_or(default_retry);
    if retry.max_attempts == 0 {
        return Err(invalid(format!(
            "chain '{chain}', task '{}': max_attempts must be >= 1",
            spec.kind
        )));
    }

    Ok(TaskDescriptor {
        id,
        kind: spec.kind,
        input: spec.input,
        constraints,
        tags: spec.tags,
        retry,
    })
}

fn invalid(msg: impl Into<String>) -> WorkchainError {
    WorkchainError::InvalidChain(msg.into())
}
