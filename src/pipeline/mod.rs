// src/pipeline/mod.rs

//! The image manipulation scenario.
//!
//! A picked image is blurred `blur_level` times, the result is saved to the
//! gallery once storage is not low, and the transient blur artifacts are
//! cleaned up. The image reference travels between stages under
//! [`KEY_IMAGE_URI`]; the save stage carries [`TAG_OUTPUT`] so clients can
//! follow the final location.

use std::path::PathBuf;

use crate::chain::{ChainBuilder, ChainGraph, RetryPolicy, TaskSpec};
use crate::constraints::Constraint;
use crate::errors::{Result, WorkchainError};
use crate::exec::TaskRegistry;

pub mod workers;

pub use workers::{uri_to_path, Blur, Cleanup, SaveImage};

pub const KEY_IMAGE_URI: &str = "image_uri";
pub const TAG_OUTPUT: &str = "output";
pub const IMAGE_MANIPULATION_WORK_NAME: &str = "image_manipulation_work";

pub const BLUR: &str = "blur";
pub const SAVE_IMAGE: &str = "save_image";
pub const CLEANUP: &str = "cleanup";

/// Prefix of every transient artifact written by [`Blur`].
pub const BLUR_OUTPUT_PREFIX: &str = "blur-filter-output-";

/// Directories the scenario's computations work in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePaths {
    /// Transient blur artifacts; emptied by [`Cleanup`].
    pub scratch_dir: PathBuf,
    /// Final saved images.
    pub gallery_dir: PathBuf,
}

impl ImagePaths {
    pub fn new(scratch_dir: impl Into<PathBuf>, gallery_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            gallery_dir: gallery_dir.into(),
        }
    }
}

/// Register the blur, save and cleanup computations.
pub fn register(registry: &mut TaskRegistry, paths: &ImagePaths) {
    registry.register(BLUR, Blur::new(paths.clone()));
    registry.register(SAVE_IMAGE, SaveImage::new(paths.clone()));
    registry.register(CLEANUP, Cleanup::new(paths.clone()));
}

/// `[blur] x blur_level -> [save_image] -> [cleanup]`.
///
/// Only the first blur gets `image_uri` in its template; every later stage
/// receives it from its predecessor.
pub fn image_chain(
    name: &str,
    image_uri: &str,
    blur_level: u32,
    retry: RetryPolicy,
) -> Result<ChainGraph> {
    if blur_level == 0 {
        return Err(WorkchainError::InvalidChain(
            "blur level must be at least 1".to_string(),
        ));
    }

    let mut builder = ChainBuilder::begin(
        name,
        TaskSpec::new(BLUR).with_input(KEY_IMAGE_URI, image_uri),
    )
    .with_default_retry(retry);

    for _ in 1..blur_level {
        builder = builder.then(TaskSpec::new(BLUR));
    }

    builder
        .then(
            TaskSpec::new(SAVE_IMAGE)
                .constraint(Constraint::StorageNotLow.name())
                .tag(TAG_OUTPUT),
        )
        .then(TaskSpec::new(CLEANUP))
        .build()
}
