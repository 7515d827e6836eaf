// src/engine/dispatcher.rs

//! The single owner of every live chain.
//!
//! All node transitions happen here, synchronously, in response to one
//! input at a time (a submission, a cancellation, a completion, a timer or
//! an environment change). Each input returns a [`DispatchStep`] that tells
//! the caller which attempts to start or stop, which timers to arm and which
//! chains changed.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::bus::ChainSnapshot;
use crate::chain::{resolve, ChainGraph, ChainName, ChainState, NodeStatus, Resolution};
use crate::constraints::{self, Environment};
use crate::engine::admission::AdmissionQueue;
use crate::engine::live::LiveChain;
use crate::engine::node::ScheduledNode;
use crate::engine::{ChainHandle, ChainId, NodeKey, Outcome};
use crate::errors::NodeFailure;
use crate::store::ChainRecord;
use crate::types::UniquenessPolicy;

/// Effects of one dispatcher input.
#[derive(Debug, Default, Clone)]
pub struct DispatchStep {
    /// Attempts that now hold a slot and must be executed.
    pub dispatched: Vec<ScheduledNode>,
    /// In-flight attempts that must be told to stop.
    pub cancelled_running: Vec<NodeKey>,
    /// Retry timers to arm.
    pub retries: Vec<(NodeKey, Duration)>,
    /// Chains whose state changed and need publishing/persisting.
    pub changed: BTreeSet<ChainId>,
    /// Chains that became settled during this step.
    pub settled: Vec<ChainId>,
}

impl DispatchStep {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
            && self.cancelled_running.is_empty()
            && self.retries.is_empty()
            && self.changed.is_empty()
            && self.settled.is_empty()
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    chains: BTreeMap<ChainId, LiveChain>,
    /// Newest chain owning each name.
    names: HashMap<ChainName, ChainId>,
    next_chain_id: u64,
    environment: Environment,
    admission: AdmissionQueue,
    /// Chains already reported as settled.
    settled: HashSet<ChainId>,
}

impl Dispatcher {
    pub fn new(workers: usize, environment: Environment) -> Self {
        Self {
            chains: BTreeMap::new(),
            names: HashMap::new(),
            next_chain_id: 1,
            environment,
            admission: AdmissionQueue::new(workers),
            settled: HashSet::new(),
        }
    }

    /// Reconcile `graph` with any live chain of the same name and admit it.
    ///
    /// Under `Replace` the existing chain is cancelled before the incoming
    /// one gets a chance to queue anything.
    pub fn submit(
        &mut self,
        graph: ChainGraph,
        policy: UniquenessPolicy,
    ) -> (ChainHandle, DispatchStep) {
        let mut step = DispatchStep::default();
        let name = graph.name().to_string();

        let existing = self
            .names
            .get(&name)
            .and_then(|id| self.chains.get(id))
            .map(|chain| (chain.id(), chain.state()));
        let resolution = resolve(existing.map(|(_, state)| state), policy);

        let chain_id = match (resolution, existing) {
            (Resolution::Reject, Some((id, _))) => {
                info!(chain = %name, chain_id = %id, "chain already in flight; keeping it");
                id
            }
            (Resolution::Append, Some((id, _))) => {
                let Some(chain) = self.chains.get_mut(&id) else {
                    return (self.handle(name, id, resolution), step);
                };
                let added = chain.append(graph);
                info!(
                    chain = %name,
                    chain_id = %id,
                    added = added.len(),
                    "appended stages to in-flight chain"
                );
                step.changed.insert(id);
                id
            }
            (Resolution::ReplaceCancelExisting, Some((old, _))) => {
                info!(chain = %name, chain_id = %old, "replacing in-flight chain");
                self.cancel_chain(old, &mut step);
                self.admit(graph, &mut step)
            }
            _ => self.admit(graph, &mut step),
        };

        self.pump(&mut step);
        (self.handle(name, chain_id, resolution), step)
    }

    /// Cancel the chain currently owning `name`.
    ///
    /// Cancelling an unknown or already terminal chain changes nothing.
    pub fn cancel(&mut self, name: &str) -> DispatchStep {
        let mut step = DispatchStep::default();

        let Some(&id) = self.names.get(name) else {
            debug!(chain = %name, "cancel for unknown chain; ignoring");
            return step;
        };
        let terminal = self
            .chains
            .get(&id)
            .is_none_or(|chain| chain.state().is_terminal());
        if terminal {
            debug!(chain = %name, chain_id = %id, "chain already terminal; cancel is a no-op");
            return step;
        }

        info!(chain = %name, chain_id = %id, "cancelling chain");
        self.cancel_chain(id, &mut step);
        self.pump(&mut step);
        step
    }

    /// Apply the outcome of one attempt.
    ///
    /// The slot held by the attempt is always released. Completions for
    /// nodes that are no longer running that attempt are otherwise ignored.
    pub fn complete(&mut self, key: NodeKey, attempt: u32, outcome: Outcome) -> DispatchStep {
        let mut step = DispatchStep::default();

        // A newer attempt of the same node owns the slot now.
        let superseded = self
            .node_runtime(key)
            .is_some_and(|(status, running)| status == NodeStatus::Running && running != attempt);
        if !superseded && !self.admission.release(key) {
            debug!(node = %key, attempt, "completion for a node that held no slot");
        }

        let Some(chain) = self.chains.get_mut(&key.chain) else {
            debug!(node = %key, attempt, "completion for an evicted chain; ignoring");
            self.pump(&mut step);
            return step;
        };

        let current = chain.node(key.node).map(|rt| (rt.status, rt.attempt));
        if current != Some((NodeStatus::Running, attempt)) {
            debug!(
                chain = %chain.name(),
                node = %key,
                attempt,
                ?current,
                "stale completion; ignoring"
            );
            self.pump(&mut step);
            return step;
        }

        let retry = chain
            .descriptor(key.node)
            .map(|d| d.retry)
            .unwrap_or_default();

        match outcome {
            Outcome::Success(output) => {
                debug!(chain = %chain.name(), node = %key, attempt, "node succeeded");
                chain.mark_succeeded(key.node, output);
            }
            Outcome::Failure(reason) => {
                warn!(chain = %chain.name(), node = %key, attempt, %reason, "node failed");
                let cancelled = chain.mark_failed(key.node, NodeFailure::Computation(reason));
                for node in cancelled {
                    self.admission.remove(NodeKey::new(key.chain, node));
                }
            }
            Outcome::Retry(reason) if chain.is_halted() => {
                debug!(
                    chain = %chain.name(),
                    node = %key,
                    attempt,
                    %reason,
                    "retry requested after the chain halted; cancelling node"
                );
                chain.mark_cancelled(key.node);
            }
            Outcome::Retry(reason) if attempt >= retry.max_attempts => {
                warn!(
                    chain = %chain.name(),
                    node = %key,
                    attempt,
                    %reason,
                    "retry requested but attempts are exhausted"
                );
                let cancelled = chain.mark_failed(
                    key.node,
                    NodeFailure::MaxAttemptsExceeded { attempts: attempt },
                );
                for node in cancelled {
                    self.admission.remove(NodeKey::new(key.chain, node));
                }
            }
            Outcome::Retry(reason) => {
                let delay = retry.delay_for(attempt);
                info!(
                    chain = %chain.name(),
                    node = %key,
                    attempt,
                    %reason,
                    delay_ms = delay.as_millis() as u64,
                    "node asked for a retry"
                );
                chain.mark_awaiting_retry(key.node);
                step.retries.push((key, delay));
            }
        }

        step.changed.insert(key.chain);
        self.pump(&mut step);
        step
    }

    /// A retry backoff for `key` elapsed.
    pub fn retry_due(&mut self, key: NodeKey) -> DispatchStep {
        let mut step = DispatchStep::default();

        let woke = self
            .chains
            .get_mut(&key.chain)
            .is_some_and(|chain| chain.clear_retry_wait(key.node));
        if !woke {
            debug!(node = %key, "retry timer for a node that is no longer waiting");
            return step;
        }

        self.pump(&mut step);
        step
    }

    /// Record a new environment and re-check constraint-blocked nodes.
    ///
    /// Reports identical to the current environment do nothing.
    pub fn set_environment(&mut self, environment: Environment) -> DispatchStep {
        let mut step = DispatchStep::default();
        if environment == self.environment {
            trace!(?environment, "environment unchanged");
            return step;
        }

        info!(?environment, "environment changed");
        self.environment = environment;
        self.pump(&mut step);
        step
    }

    /// Drop a settled chain from the registry. Returns its name if it was
    /// removed.
    pub fn evict(&mut self, id: ChainId) -> Option<ChainName> {
        let settled = self.chains.get(&id).is_some_and(|chain| chain.is_settled());
        if !settled {
            debug!(chain_id = %id, "eviction skipped; chain missing or still active");
            return None;
        }

        let chain = self.chains.remove(&id)?;
        self.settled.remove(&id);
        let name = chain.name().to_string();
        if self.names.get(&name) == Some(&id) {
            self.names.remove(&name);
        }

        debug!(chain = %name, chain_id = %id, "evicted settled chain");
        Some(name)
    }

    /// Re-admit chains loaded from a store.
    pub fn restore(&mut self, records: Vec<ChainRecord>) -> DispatchStep {
        let mut step = DispatchStep::default();

        for record in records {
            let chain = LiveChain::from_record(record);
            let id = chain.id();
            let name = chain.name().to_string();

            self.next_chain_id = self.next_chain_id.max(id.0 + 1);
            let newer_known = self.names.get(&name).is_some_and(|known| *known > id);
            if !newer_known {
                self.names.insert(name.clone(), id);
            }

            info!(chain = %name, chain_id = %id, state = %chain.state(), "restored chain");
            self.chains.insert(id, chain);
            step.changed.insert(id);
        }

        self.pump(&mut step);
        step
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn chain(&self, id: ChainId) -> Option<&LiveChain> {
        self.chains.get(&id)
    }

    pub fn chain_by_name(&self, name: &str) -> Option<&LiveChain> {
        self.names.get(name).and_then(|id| self.chains.get(id))
    }

    pub fn chain_state(&self, name: &str) -> Option<ChainState> {
        self.chain_by_name(name).map(|chain| chain.state())
    }

    pub fn node_status(&self, key: NodeKey) -> Option<NodeStatus> {
        self.chains.get(&key.chain)?.status_of(key.node)
    }

    pub fn snapshot(&self, id: ChainId) -> Option<ChainSnapshot> {
        self.chains.get(&id).map(|chain| chain.snapshot())
    }

    pub fn record(&self, id: ChainId) -> Option<ChainRecord> {
        self.chains.get(&id).map(|chain| chain.record())
    }

    pub fn running_len(&self) -> usize {
        self.admission.running_len()
    }

    pub fn queued_len(&self) -> usize {
        self.admission.waiting_len()
    }

    /// No chain has work left and no attempt holds a slot.
    pub fn is_idle(&self) -> bool {
        self.admission.running_len() == 0 && self.chains.values().all(|c| c.is_settled())
    }

    fn node_runtime(&self, key: NodeKey) -> Option<(NodeStatus, u32)> {
        let rt = self.chains.get(&key.chain)?.node(key.node)?;
        Some((rt.status, rt.attempt))
    }

    fn handle(&self, name: ChainName, chain_id: ChainId, resolution: Resolution) -> ChainHandle {
        ChainHandle {
            name,
            chain_id,
            resolution,
        }
    }

    fn admit(&mut self, graph: ChainGraph, step: &mut DispatchStep) -> ChainId {
        let id = ChainId(self.next_chain_id);
        self.next_chain_id += 1;

        let name = graph.name().to_string();
        info!(
            chain = %name,
            chain_id = %id,
            stages = graph.stage_count(),
            nodes = graph.node_count(),
            "admitted chain"
        );

        self.chains.insert(id, LiveChain::new(id, graph));
        self.names.insert(name, id);
        step.changed.insert(id);
        id
    }

    fn cancel_chain(&mut self, id: ChainId, step: &mut DispatchStep) {
        let Some(chain) = self.chains.get_mut(&id) else {
            return;
        };

        let effect = chain.cancel();
        let dropped = self.admission.remove_chain(id);
        debug!(
            chain = %chain.name(),
            chain_id = %id,
            dequeued = dropped.len(),
            running = effect.running.len(),
            "chain cancelled"
        );

        step.cancelled_running
            .extend(effect.running.into_iter().map(|node| NodeKey::new(id, node)));
        step.changed.insert(id);
    }

    /// Queue every ready node whose constraints hold, then start queued
    /// nodes while slots are free.
    fn pump(&mut self, step: &mut DispatchStep) {
        self.promote_ready(step);

        loop {
            let admitted = self.admission.admit_next();
            if admitted.is_empty() {
                break;
            }

            for key in admitted {
                let scheduled = self
                    .chains
                    .get_mut(&key.chain)
                    .and_then(|chain| chain.mark_running(key.node));

                match scheduled {
                    Some(node) => {
                        debug!(chain = %node.chain, node = %key, attempt = node.attempt, "node running");
                        step.changed.insert(key.chain);
                        step.dispatched.push(node);
                    }
                    None => {
                        self.admission.release(key);
                    }
                }
            }
        }

        self.collect_settled(step);
    }

    fn promote_ready(&mut self, step: &mut DispatchStep) {
        for (id, chain) in self.chains.iter_mut() {
            for node in chain.ready_candidates() {
                let Some(descriptor) = chain.descriptor(node) else {
                    continue;
                };

                if !constraints::satisfied(&descriptor.constraints, &self.environment) {
                    trace!(
                        chain = %chain.name(),
                        node = %node,
                        unmet = ?constraints::unmet(&descriptor.constraints, &self.environment),
                        "constraints unmet; node stays not ready"
                    );
                    continue;
                }

                let input = chain.resolved_input(node);
                chain.mark_queued(node, input);
                self.admission.enqueue(NodeKey::new(*id, node));
                step.changed.insert(*id);
            }
        }
    }

    fn collect_settled(&mut self, step: &mut DispatchStep) {
        for id in &step.changed {
            let settled = self.chains.get(id).is_some_and(|chain| chain.is_settled());
            if settled && self.settled.insert(*id) {
                step.settled.push(*id);
            }
        }
    }
}
