// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::ChainId;
use crate::errors::Result;
use crate::store::{ChainRecord, ChainStore};

/// Volatile store. Clones share the same records, so a test can keep one
/// clone to inspect what the runtime wrote or to seed a second runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<ChainId, ChainRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain: ChainId) -> Option<ChainRecord> {
        self.records().get(&chain).cloned()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<ChainId, ChainRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChainStore for MemoryStore {
    fn save(&self, record: &ChainRecord) -> Result<()> {
        self.records().insert(record.chain_id, record.clone());
        Ok(())
    }

    fn remove(&self, chain: ChainId) -> Result<()> {
        self.records().remove(&chain);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ChainRecord>> {
        Ok(self.records().values().cloned().collect())
    }
}
