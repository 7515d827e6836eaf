// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::chain::RetryPolicy;
use crate::constraints::Environment;
use crate::engine::RuntimeOptions;
use crate::pipeline::{ImagePaths, IMAGE_MANIPULATION_WORK_NAME};
use crate::types::{BackoffPolicy, StoreMode, UniquenessPolicy};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [runtime]
/// workers = 2
/// retention_secs = 30
/// cancel_grace_ms = 2000
///
/// [retry]
/// max_attempts = 3
/// backoff = "exponential"
/// initial_delay_ms = 30000
/// max_delay_ms = 18000000
///
/// [store]
/// mode = "file"
/// path = ".workchain"
///
/// [environment]
/// storage_low = false
///
/// [pipeline]
/// image = "pictures/lake.png"
/// blur_level = 3
/// policy = "replace"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub runtime: RuntimeSection,
    pub retry: RetrySection,
    pub store: StoreSection,
    pub environment: EnvironmentSection,
    pub pipeline: PipelineSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            runtime: raw.runtime,
            retry: raw.retry,
            store: raw.store,
            environment: raw.environment,
            pipeline: raw.pipeline,
        }
    }

    /// Built-in defaults, used when no config file exists.
    pub fn defaults() -> Self {
        Self::new_unchecked(RawConfigFile::default())
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            workers: self.runtime.workers,
            retention: Duration::from_secs(self.runtime.retention_secs),
            cancel_grace: Duration::from_millis(self.runtime.cancel_grace_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: self.retry.backoff,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn environment(&self) -> Environment {
        Environment {
            storage_low: self.environment.storage_low,
            battery_low: self.environment.battery_low,
        }
    }

    pub fn image_paths(&self) -> ImagePaths {
        ImagePaths::new(&self.pipeline.scratch_dir, &self.pipeline.gallery_dir)
    }
}

/// `[runtime]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    /// Number of attempts that may run at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long a finished chain stays observable.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How long a cancelled computation may take to stop before it is aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_workers() -> usize {
    2
}

fn default_retention_secs() -> u64 {
    30
}

fn default_cancel_grace_ms() -> u64 {
    2_000
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retention_secs: default_retention_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// `[retry]` section: the default retry policy of every task.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// `"linear"` or `"exponential"`.
    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    30_000
}

fn default_max_delay_ms() -> u64 {
    5 * 60 * 60 * 1_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffPolicy::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// `"memory"` (default) or `"file"`.
    #[serde(default)]
    pub mode: StoreMode,

    /// Directory for `mode = "file"`.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".workchain")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            path: default_store_path(),
        }
    }
}

/// `[environment]` section: the initial environment signals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentSection {
    #[serde(default)]
    pub storage_low: bool,
    #[serde(default)]
    pub battery_low: bool,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Unique chain name.
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub policy: UniquenessPolicy,

    #[serde(default = "default_blur_level")]
    pub blur_level: u32,

    /// Source image; may be overridden with `--image`.
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    #[serde(default = "default_gallery_dir")]
    pub gallery_dir: PathBuf,
}

fn default_pipeline_name() -> String {
    IMAGE_MANIPULATION_WORK_NAME.to_string()
}

fn default_blur_level() -> u32 {
    1
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("blur_filter_outputs")
}

fn default_gallery_dir() -> PathBuf {
    PathBuf::from("gallery")
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            policy: UniquenessPolicy::default(),
            blur_level: default_blur_level(),
            image: None,
            scratch_dir: default_scratch_dir(),
            gallery_dir: default_gallery_dir(),
        }
    }
}
