// src/pipeline/workers.rs

//! Computations for the image scenario.
//!
//! The blur transform itself is opaque here: it copies the source bytes
//! into a new artifact. What matters is the data contract (`image_uri` in,
//! `image_uri` out) and the artifacts left in the scratch directory.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use tracing::{debug, info};

use crate::chain::Data;
use crate::engine::Outcome;
use crate::exec::{BoxFuture, Computation, TaskContext};
use crate::pipeline::{ImagePaths, BLUR_OUTPUT_PREFIX, KEY_IMAGE_URI};

/// Accepts plain paths and `file://` URIs.
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

fn required_uri(ctx: &TaskContext) -> anyhow::Result<PathBuf> {
    match ctx.input_str(KEY_IMAGE_URI) {
        Some(uri) if !uri.trim().is_empty() => Ok(uri_to_path(uri)),
        _ => Err(anyhow!("invalid input uri")),
    }
}

fn into_outcome(result: anyhow::Result<Data>) -> Outcome {
    match result {
        Ok(output) => Outcome::Success(output),
        Err(err) => Outcome::Failure(format!("{err:#}")),
    }
}

#[derive(Debug, Clone)]
pub struct Blur {
    paths: ImagePaths,
}

impl Blur {
    pub fn new(paths: ImagePaths) -> Self {
        Self { paths }
    }
}

impl Computation for Blur {
    fn run(&self, ctx: TaskContext) -> BoxFuture<Outcome> {
        let scratch = self.paths.scratch_dir.clone();
        Box::pin(async move { into_outcome(blur(&scratch, &ctx).await) })
    }
}

async fn blur(scratch: &Path, ctx: &TaskContext) -> anyhow::Result<Data> {
    info!(chain = %ctx.chain, node = %ctx.node, "blurring image");

    let source = required_uri(ctx)?;
    let bytes = tokio::fs::read(&source)
        .await
        .with_context(|| format!("reading image {:?}", source))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(&bytes);
    hasher.update(ctx.node.to_string().as_bytes());
    let digest = hasher.finalize().to_hex();
    let target = scratch.join(format!("{BLUR_OUTPUT_PREFIX}{}.png", &digest[..16]));

    if ctx.is_cancelled() {
        bail!("cancelled before writing blurred image");
    }

    tokio::fs::create_dir_all(scratch)
        .await
        .with_context(|| format!("creating scratch dir {:?}", scratch))?;
    tokio::fs::write(&target, &bytes)
        .await
        .with_context(|| format!("writing blurred image {:?}", target))?;

    info!(chain = %ctx.chain, node = %ctx.node, output = %target.display(), "blurring completed");
    Ok(Data::new().with(KEY_IMAGE_URI, target.display().to_string()))
}

#[derive(Debug, Clone)]
pub struct SaveImage {
    paths: ImagePaths,
}

impl SaveImage {
    pub fn new(paths: ImagePaths) -> Self {
        Self { paths }
    }
}

impl Computation for SaveImage {
    fn run(&self, ctx: TaskContext) -> BoxFuture<Outcome> {
        let gallery = self.paths.gallery_dir.clone();
        Box::pin(async move { into_outcome(save_image(&gallery, &ctx).await) })
    }
}

async fn save_image(gallery: &Path, ctx: &TaskContext) -> anyhow::Result<Data> {
    info!(chain = %ctx.chain, node = %ctx.node, "saving image");

    let source = required_uri(ctx)?;
    let Some(file_name) = source.file_name() else {
        bail!("image reference {:?} has no file name", source);
    };
    let target = gallery.join(file_name);

    tokio::fs::create_dir_all(gallery)
        .await
        .with_context(|| format!("creating gallery dir {:?}", gallery))?;
    tokio::fs::copy(&source, &target)
        .await
        .with_context(|| format!("copying {:?} to {:?}", source, target))?;

    let saved = target.display().to_string();
    info!(chain = %ctx.chain, node = %ctx.node, saved = %saved, "image saved");
    Ok(Data::new().with(KEY_IMAGE_URI, saved))
}

#[derive(Debug, Clone)]
pub struct Cleanup {
    paths: ImagePaths,
}

impl Cleanup {
    pub fn new(paths: ImagePaths) -> Self {
        Self { paths }
    }
}

impl Computation for Cleanup {
    fn run(&self, ctx: TaskContext) -> BoxFuture<Outcome> {
        let scratch = self.paths.scratch_dir.clone();
        Box::pin(async move { into_outcome(cleanup(&scratch, &ctx).await) })
    }
}

async fn cleanup(scratch: &Path, ctx: &TaskContext) -> anyhow::Result<Data> {
    info!(chain = %ctx.chain, node = %ctx.node, "cleaning up old temporary files");

    if !tokio::fs::try_exists(scratch).await.unwrap_or(false) {
        return Ok(Data::new());
    }

    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(scratch)
        .await
        .with_context(|| format!("reading scratch dir {:?}", scratch))?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(BLUR_OUTPUT_PREFIX) && name.ends_with(".png") {
            tokio::fs::remove_file(entry.path())
                .await
                .with_context(|| format!("deleting {:?}", entry.path()))?;
            debug!(file = %name, "deleted transient artifact");
            removed += 1;
        }
    }

    info!(chain = %ctx.chain, node = %ctx.node, removed, "cleanup finished");
    Ok(Data::new())
}
