// src/exec/mod.rs

//! Execution layer.
//!
//! This module runs the computations registered for each task type and
//! reports back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`registry`] maps task types to [`Computation`]s.
//! - [`runner`] executes one attempt inside a fault-isolating task.
//! - [`executor_loop`] owns the loop that starts and cancels attempts.
//! - [`backend`] provides the `ExecutorBackend` trait and the
//!   `RealExecutorBackend` used in production.

pub mod backend;
pub mod executor_loop;
pub mod registry;
pub mod runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::{spawn_executor, ExecutorCommand};
pub use registry::{BoxFuture, Computation, TaskContext, TaskRegistry};
pub use runner::run_node;
pub use tokio_util::sync::CancellationToken;
