// src/lib.rs

pub mod bus;
pub mod chain;
pub mod cli;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod types;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::bus::{ChainSnapshot, ObserveTag, Subscription};
use crate::chain::{ChainGraph, ChainState, NodeStatus};
use crate::cli::CliArgs;
use crate::config::{load_config, ConfigFile};
use crate::constraints::blocked;
use crate::engine::{launch, ChainHandle};
use crate::exec::TaskRegistry;
use crate::pipeline::{image_chain, KEY_IMAGE_URI, TAG_OUTPUT};
use crate::store::open_store;
use crate::types::UniquenessPolicy;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the image chain and its computations
/// - the runtime (dispatcher, executor, store, bus)
/// - Ctrl-C handling (cancels the chain by name)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;

    let image = args
        .image
        .clone()
        .or_else(|| cfg.pipeline.image.clone())
        .context("no input image: pass --image or set [pipeline].image")?;
    let blur_level = args.blur_level.unwrap_or(cfg.pipeline.blur_level);
    let policy = args.policy.unwrap_or(cfg.pipeline.policy);

    let chain = image_chain(&cfg.pipeline.name, &image, blur_level, cfg.retry_policy())?;

    // The environment is read from config once and never changes afterwards,
    // so a node it blocks now would stay `NotReady` for good.
    if let Some((node, missing)) = blocked(&chain, &cfg.environment()).first() {
        let names: Vec<_> = missing.iter().map(|c| c.name()).collect();
        bail!(
            "task '{}' requires [{}], which the [environment] section does not satisfy",
            node.kind,
            names.join(", ")
        );
    }

    if args.dry_run {
        print_dry_run(&cfg, &chain, policy);
        return Ok(());
    }

    let mut registry = TaskRegistry::new();
    pipeline::register(&mut registry, &cfg.image_paths());

    let store = open_store(cfg.store.mode, &cfg.store.path);
    let launched = launch(cfg.runtime_options(), cfg.environment(), registry, store);
    let client = launched.client.clone();

    // Subscribe before submitting so no transition is missed.
    let mut output = client.observe(ObserveTag::tag(TAG_OUTPUT));
    let handle = client.submit(chain, policy).await?;
    info!(
        chain = %handle.name,
        chain_id = %handle.chain_id,
        resolution = ?handle.resolution,
        "chain submitted"
    );

    // Ctrl-C → cancel the chain; the bus then reports it as cancelled.
    {
        let client = client.clone();
        let name = handle.name.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            if let Err(e) = client.cancel(name).await {
                warn!(error = %e, "failed to cancel chain on Ctrl+C");
            }
        });
    }

    let last = follow(&mut output, &handle).await;
    report(last.as_ref());

    client.shutdown().await?;
    launched.handle.await??;
    Ok(())
}

/// Print progress for `handle`'s chain until it reaches a terminal state.
async fn follow(output: &mut Subscription, handle: &ChainHandle) -> Option<ChainSnapshot> {
    let mut last_state = None;

    while let Some(snapshot) = output.next().await {
        if snapshot.chain_id != handle.chain_id {
            continue;
        }

        if !snapshot.state.is_terminal() {
            let done = snapshot.count(NodeStatus::Succeeded);
            if last_state != Some((snapshot.state, done)) {
                println!(
                    "in progress: {}/{} tasks done",
                    done,
                    snapshot.nodes.len()
                );
                last_state = Some((snapshot.state, done));
            }
            continue;
        }

        return Some(snapshot);
    }

    None
}

fn report(last: Option<&ChainSnapshot>) {
    match last {
        Some(snapshot) if snapshot.state == ChainState::Succeeded => {
            match snapshot.output_of(TAG_OUTPUT, KEY_IMAGE_URI) {
                Some(uri) => println!("saved: {uri}"),
                None => println!("succeeded"),
            }
        }
        Some(snapshot) if snapshot.state == ChainState::Cancelled => println!("cancelled"),
        Some(_) => println!("failed"),
        None => println!("runtime stopped before the chain finished"),
    }
}

fn print_dry_run(cfg: &ConfigFile, chain: &ChainGraph, policy: UniquenessPolicy) {
    println!("workchain dry run");
    println!("  workers: {}", cfg.runtime.workers);
    println!("  store: {:?} ({})", cfg.store.mode, cfg.store.path.display());
    println!("  policy: {:?}", policy);
    println!();
    println!("chain '{}':", chain.name());

    for (index, stage) in chain.stages().iter().enumerate() {
        for node in stage.nodes() {
            let mut line = format!("  stage {index}: {} ({})", node.kind, node.id);
            if !node.constraints.is_empty() {
                let names: Vec<_> = node.constraints.iter().map(|c| c.name()).collect();
                line.push_str(&format!(" requires [{}]", names.join(", ")));
            }
            if !node.tags.is_empty() {
                let tags: Vec<_> = node.tags.iter().map(String::as_str).collect();
                line.push_str(&format!(" tags [{}]", tags.join(", ")));
            }
            println!("{line}");
        }
    }
}
