// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::UniquenessPolicy;

/// Command-line arguments for `workchain`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workchain",
    version,
    about = "Blur an image through a persistent, constraint-gated task chain.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Workchain.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Image to blur. Overrides `[pipeline].image`.
    #[arg(long, value_name = "PATH")]
    pub image: Option<String>,

    /// How many times to blur. Overrides `[pipeline].blur_level`.
    #[arg(long, value_name = "N")]
    pub blur_level: Option<u32>,

    /// What to do if a chain of the same name is still in flight
    /// (replace, keep, append). Overrides `[pipeline].policy`.
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<UniquenessPolicy>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKCHAIN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config, print the chain, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
