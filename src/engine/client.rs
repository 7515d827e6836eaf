// src/engine/client.rs

//! Submission API.

use tokio::sync::{mpsc, oneshot};

use crate::bus::{ChainSnapshot, ObserveTag, StateBus, Subscription};
use crate::chain::{ChainBuilder, ChainGraph, ChainName};
use crate::constraints::Environment;
use crate::engine::{ChainHandle, RuntimeEvent};
use crate::errors::{Result, WorkchainError};
use crate::types::UniquenessPolicy;

/// Cloneable handle used to submit, cancel and observe chains.
///
/// Node-level failures are never returned from these calls; they show up
/// in the snapshots delivered by [`observe`](WorkClient::observe).
#[derive(Debug, Clone)]
pub struct WorkClient {
    tx: mpsc::Sender<RuntimeEvent>,
    bus: StateBus,
}

impl WorkClient {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>, bus: StateBus) -> Self {
        Self { tx, bus }
    }

    /// Submit `chain` and wait for the uniqueness decision.
    pub async fn submit(&self, chain: ChainGraph, policy: UniquenessPolicy) -> Result<ChainHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Submit {
            chain,
            policy,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WorkchainError::RuntimeClosed)
    }

    /// Build and submit. Construction errors are returned before anything
    /// reaches the runtime.
    pub async fn submit_builder(
        &self,
        builder: ChainBuilder,
        policy: UniquenessPolicy,
    ) -> Result<ChainHandle> {
        let chain = builder.build()?;
        self.submit(chain, policy).await
    }

    /// Cancel the chain owning `name`. Returns once the cancellation has
    /// been applied and published; in-flight attempts stop asynchronously.
    pub async fn cancel(&self, name: impl Into<ChainName>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Cancel {
            name: name.into(),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| WorkchainError::RuntimeClosed)
    }

    pub fn observe(&self, tag: ObserveTag) -> Subscription {
        self.bus.subscribe(tag)
    }

    /// Latest snapshot published for `name`, if it is still retained.
    pub fn latest(&self, name: &str) -> Option<ChainSnapshot> {
        self.bus.latest(name)
    }

    /// Report the current environment. Constraint-blocked nodes are
    /// re-checked if it differs from the previous report.
    pub async fn set_environment(&self, environment: Environment) -> Result<()> {
        self.send(RuntimeEvent::EnvironmentChanged(environment)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(RuntimeEvent::ShutdownRequested).await
    }

    pub fn bus(&self) -> &StateBus {
        &self.bus
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| WorkchainError::RuntimeClosed)
    }
}
