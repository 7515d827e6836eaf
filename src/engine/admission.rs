// src/engine/admission.rs

//! Bounded worker-slot accounting.
//!
//! Nodes that passed their stage and constraint gates wait here in FIFO
//! order until a slot frees up. The queue never holds more than `capacity`
//! running entries.

use std::collections::{HashSet, VecDeque};

use crate::engine::{ChainId, NodeKey};

#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    capacity: usize,
    waiting: VecDeque<NodeKey>,
    running: HashSet<NodeKey>,
}

impl AdmissionQueue {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            waiting: VecDeque::new(),
            running: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add `key` to the back of the waiting line. Duplicates are ignored.
    pub fn enqueue(&mut self, key: NodeKey) {
        if self.running.contains(&key) || self.waiting.contains(&key) {
            return;
        }
        self.waiting.push_back(key);
    }

    /// Drop a waiting entry. Returns whether it was present.
    pub fn remove(&mut self, key: NodeKey) -> bool {
        let before = self.waiting.len();
        self.waiting.retain(|k| *k != key);
        before != self.waiting.len()
    }

    /// Drop every waiting entry of `chain`.
    pub fn remove_chain(&mut self, chain: ChainId) -> Vec<NodeKey> {
        let (dropped, kept): (Vec<_>, Vec<_>) =
            self.waiting.drain(..).partition(|k| k.chain == chain);
        self.waiting = kept.into();
        dropped
    }

    /// Pop waiting entries in FIFO order while slots are free.
    pub fn admit_next(&mut self) -> Vec<NodeKey> {
        let mut admitted = Vec::new();
        while self.running.len() < self.capacity {
            let Some(key) = self.waiting.pop_front() else {
                break;
            };
            self.running.insert(key);
            admitted.push(key);
        }
        admitted
    }

    /// Free the slot held by `key`. Returns whether it held one.
    pub fn release(&mut self, key: NodeKey) -> bool {
        self.running.remove(&key)
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn waiting(&self) -> impl Iterator<Item = &NodeKey> {
        self.waiting.iter()
    }
}
