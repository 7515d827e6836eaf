#![allow(dead_code)]

use std::time::Duration;

use workchain::chain::{ChainBuilder, ChainGraph, RetryPolicy, TaskSpec};
use workchain::config::{ConfigFile, RawConfigFile};
use workchain::engine::RuntimeOptions;
use workchain::types::{BackoffPolicy, StoreMode, UniquenessPolicy};

/// A chain with one single-task stage per entry of `kinds`.
pub fn linear_chain(name: &str, kinds: &[&str]) -> ChainGraph {
    stages_chain(name, &kinds.iter().map(|k| vec![*k]).collect::<Vec<_>>())
}

/// A chain with one stage per entry; each inner slice is a fan stage.
pub fn stages_chain(name: &str, stages: &[Vec<&str>]) -> ChainGraph {
    let mut builder = ChainBuilder::new(name).with_default_retry(fast_retry(3));
    for stage in stages {
        builder = builder.then_all(stage.iter().map(|k| TaskSpec::new(*k)).collect());
    }
    builder.build().expect("test chain should be valid")
}

/// Retry policy with millisecond backoffs so tests don't sleep for long.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_backoff(BackoffPolicy::Linear, Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(50))
}

/// Runtime options suited to tests: short retention and grace.
pub fn test_options(workers: usize) -> RuntimeOptions {
    RuntimeOptions {
        workers,
        retention: Duration::from_secs(60),
        cancel_grace: Duration::from_millis(100),
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.runtime.workers = workers;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy, initial_ms: u64, max_ms: u64) -> Self {
        self.config.retry.backoff = backoff;
        self.config.retry.initial_delay_ms = initial_ms;
        self.config.retry.max_delay_ms = max_ms;
        self
    }

    pub fn store(mut self, mode: StoreMode, path: &str) -> Self {
        self.config.store.mode = mode;
        self.config.store.path = path.into();
        self
    }

    pub fn storage_low(mut self, low: bool) -> Self {
        self.config.environment.storage_low = low;
        self
    }

    pub fn pipeline(mut self, name: &str, policy: UniquenessPolicy, blur_level: u32) -> Self {
        self.config.pipeline.name = name.to_string();
        self.config.pipeline.policy = policy;
        self.config.pipeline.blur_level = blur_level;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
