// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like worker and attempt counts (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_config, load_from_path};
pub use model::{
    ConfigFile, EnvironmentSection, PipelineSection, RawConfigFile, RetrySection, RuntimeSection,
    StoreSection,
};
