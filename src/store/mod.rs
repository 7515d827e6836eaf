// src/store/mod.rs

//! Pluggable chain persistence.
//!
//! The runtime writes a [`ChainRecord`] after every transition of a chain
//! and removes it on eviction. At startup every stored record is handed
//! back to the dispatcher.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chain::{ChainGraph, NodeId};
use crate::engine::{ChainId, NodeRuntime};
use crate::errors::Result;
use crate::fs::RealFileSystem;
use crate::types::StoreMode;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Everything needed to rebuild a live chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub chain_id: ChainId,
    pub graph: ChainGraph,
    pub nodes: Vec<NodeRecord>,
    pub cancel_requested: bool,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub runtime: NodeRuntime,
}

pub trait ChainStore: Send {
    fn save(&self, record: &ChainRecord) -> Result<()>;
    fn remove(&self, chain: ChainId) -> Result<()>;
    fn load_all(&self) -> Result<Vec<ChainRecord>>;
}

/// Build the store selected by `mode`. `path` is only used by file stores.
pub fn open_store(mode: StoreMode, path: &Path) -> Box<dyn ChainStore> {
    match mode {
        StoreMode::Memory => Box::new(MemoryStore::new()),
        StoreMode::File => Box::new(FileStore::new(path, RealFileSystem)),
    }
}
