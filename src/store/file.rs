// src/store/file.rs

//! One pretty-printed JSON document per chain: `<dir>/chain-<id>.json`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::engine::ChainId;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::store::{ChainRecord, ChainStore};

const FILE_PREFIX: &str = "chain-";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug)]
pub struct FileStore<F: FileSystem> {
    dir: PathBuf,
    fs: F,
}

impl<F: FileSystem> FileStore<F> {
    pub fn new(dir: impl AsRef<Path>, fs: F) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            fs,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, chain: ChainId) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", chain.0))
    }

    fn is_record_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
    }

    fn read_record(&self, path: &Path) -> Result<ChainRecord> {
        let json = self.fs.read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl<F: FileSystem> ChainStore for FileStore<F> {
    fn save(&self, record: &ChainRecord) -> Result<()> {
        let path = self.path_for(record.chain_id);
        let json = serde_json::to_string_pretty(record)?;
        self.fs.write(&path, json.as_bytes())?;
        debug!(chain_id = %record.chain_id, path = %path.display(), "saved chain");
        Ok(())
    }

    fn remove(&self, chain: ChainId) -> Result<()> {
        let path = self.path_for(chain);
        self.fs.remove_file(&path)?;
        debug!(chain_id = %chain, path = %path.display(), "removed stored chain");
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<ChainRecord>> {
        let mut records = Vec::new();

        for path in self.fs.read_dir(&self.dir)? {
            if !Self::is_record_file(&path) {
                continue;
            }
            match self.read_record(&path) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable chain record");
                }
            }
        }

        records.sort_by_key(|r| r.chain_id);
        Ok(records)
    }
}
