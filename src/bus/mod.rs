// src/bus/mod.rs

//! State bus: fan-out of chain snapshots to observers.
//!
//! The runtime publishes a full [`ChainSnapshot`] after every node or chain
//! transition. Observers subscribe by chain name or by node tag and receive
//! snapshots through their own unbounded channel, which keeps per-observer
//! delivery in publication order.
//!
//! New subscribers first get the latest snapshot of every matching chain, so
//! resubscribing restarts the stream from the current state. The bus only
//! holds the sending half of each observer's channel; an observer that goes
//! away is pruned on the next publish.

pub mod snapshot;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, trace};

use crate::chain::ChainName;
use crate::engine::ChainId;

pub use snapshot::{ChainSnapshot, NodeSnapshot, ObserveTag};

struct Observer {
    id: u64,
    tag: ObserveTag,
    tx: mpsc::UnboundedSender<ChainSnapshot>,
}

#[derive(Default)]
struct BusInner {
    observers: Vec<Observer>,
    /// Latest snapshot per chain name, replayed to new subscribers.
    latest: HashMap<ChainName, ChainSnapshot>,
    next_observer_id: u64,
}

fn lock(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to the shared bus.
#[derive(Clone, Default)]
pub struct StateBus {
    inner: Arc<Mutex<BusInner>>,
}

impl fmt::Debug for StateBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("StateBus")
            .field("observers", &inner.observers.len())
            .field("chains", &inner.latest.len())
            .finish()
    }
}

impl StateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Matching latest snapshots are queued right away.
    pub fn subscribe(&self, tag: ObserveTag) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);

        let mut replay: Vec<&ChainSnapshot> =
            inner.latest.values().filter(|s| tag.matches(s)).collect();
        replay.sort_by_key(|s| s.chain_id);
        for snapshot in replay {
            let _ = tx.send(snapshot.clone());
        }

        let id = inner.next_observer_id;
        inner.next_observer_id += 1;
        inner.observers.push(Observer {
            id,
            tag: tag.clone(),
            tx,
        });
        debug!(observer = id, ?tag, "observer subscribed");

        Subscription {
            id,
            tag,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `snapshot` to every matching observer and remember it for
    /// replay.
    pub fn publish(&self, snapshot: ChainSnapshot) {
        let mut inner = lock(&self.inner);

        inner.observers.retain(|observer| {
            if !observer.tag.matches(&snapshot) {
                return !observer.tx.is_closed();
            }
            let delivered = observer.tx.send(snapshot.clone()).is_ok();
            if !delivered {
                debug!(observer = observer.id, "observer went away; pruning");
            }
            delivered
        });

        trace!(
            chain = %snapshot.name,
            chain_id = %snapshot.chain_id,
            seq = snapshot.seq,
            state = %snapshot.state,
            "published snapshot"
        );

        // A replaced chain may still publish its own late transitions; the
        // replay cache keeps following the newest chain of each name.
        let newer_known = inner
            .latest
            .get(&snapshot.name)
            .is_some_and(|s| s.chain_id > snapshot.chain_id);
        if !newer_known {
            inner.latest.insert(snapshot.name.clone(), snapshot);
        }
    }

    /// Latest snapshot published for `name`.
    pub fn latest(&self, name: &str) -> Option<ChainSnapshot> {
        lock(&self.inner).latest.get(name).cloned()
    }

    /// Drop the replay entry for an evicted chain.
    pub fn forget(&self, name: &str, chain_id: ChainId) {
        let mut inner = lock(&self.inner);
        if inner.latest.get(name).is_some_and(|s| s.chain_id == chain_id) {
            inner.latest.remove(name);
        }
    }

    /// Number of observers that are still attached.
    pub fn observer_count(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.observers.retain(|o| !o.tx.is_closed());
        inner.observers.len()
    }
}

/// A live subscription to the bus.
///
/// Yields snapshots through [`next`](Subscription::next) or as a
/// [`Stream`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    tag: ObserveTag,
    rx: mpsc::UnboundedReceiver<ChainSnapshot>,
    bus: Weak<Mutex<BusInner>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn tag(&self) -> &ObserveTag {
        &self.tag
    }

    /// Wait for the next snapshot. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<ChainSnapshot> {
        self.rx.recv().await
    }

    /// Next snapshot if one is already queued.
    pub fn try_next(&mut self) -> Option<ChainSnapshot> {
        self.rx.try_recv().ok()
    }

    /// Skip snapshots until one satisfies `pred`.
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<ChainSnapshot>
    where
        F: FnMut(&ChainSnapshot) -> bool,
    {
        while let Some(snapshot) = self.rx.recv().await {
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }

    /// Explicitly detach from the bus.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            lock(&inner).observers.retain(|o| o.id != self.id);
        }
    }
}

impl Stream for Subscription {
    type Item = ChainSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
