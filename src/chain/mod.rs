// src/chain/mod.rs

//! Chain model.
//!
//! - [`data`] holds the key/value payloads passed between tasks.
//! - [`task`] describes one unit of work ([`TaskDescriptor`], [`TaskSpec`]).
//! - [`graph`] is the immutable, stage-ordered [`ChainGraph`].
//! - [`builder`] validates specs into a graph.
//! - [`resolver`] applies the uniqueness policy to a submission.
//! - [`state`] defines node/chain states and the chain-state reduction.

pub mod builder;
pub mod data;
pub mod graph;
pub mod resolver;
pub mod state;
pub mod task;

pub use builder::ChainBuilder;
pub use data::{Data, DataValue};
pub use graph::{ChainGraph, ChainName, Stage};
pub use resolver::{resolve, Resolution};
pub use state::{ChainState, NodeStatus};
pub use task::{NodeId, RetryPolicy, TaskDescriptor, TaskKind, TaskSpec};
