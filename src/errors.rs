// src/errors.rs

//! Crate-wide error types.
//!
//! [`WorkchainError`] covers everything that is reported synchronously to a
//! caller (bad chains, bad config, IO, a stopped runtime). [`NodeFailure`] is
//! the per-node failure taxonomy; it never travels back to the submitter and
//! is only observed through state snapshots.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkchainError {
    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("runtime is not running")]
    RuntimeClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a node ended up `Failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NodeFailure {
    /// The computation reported failure (or panicked, or was not registered).
    #[error("computation failed: {0}")]
    Computation(String),

    /// The computation kept asking for a retry until the ceiling was hit.
    #[error("max attempts exceeded after {attempts} attempt(s)")]
    MaxAttemptsExceeded { attempts: u32 },
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WorkchainError>;
