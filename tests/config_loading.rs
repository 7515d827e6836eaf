// tests/config_loading.rs

mod common;
use crate::common::builders::ConfigFileBuilder;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tempfile::NamedTempFile;
use workchain::cli::{CliArgs, LogLevel};
use workchain::config::{load_and_validate, load_config, load_from_path, ConfigFile};
use workchain::errors::WorkchainError;
use workchain::pipeline::IMAGE_MANIPULATION_WORK_NAME;
use workchain::types::{BackoffPolicy, StoreMode, UniquenessPolicy};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn empty_file_yields_defaults() {
    let file = write_config("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.runtime.workers, 2);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.retry.backoff, BackoffPolicy::Exponential);
    assert_eq!(cfg.store.mode, StoreMode::Memory);
    assert_eq!(cfg.pipeline.name, IMAGE_MANIPULATION_WORK_NAME);
    assert_eq!(cfg.pipeline.policy, UniquenessPolicy::Replace);
    assert_eq!(cfg.pipeline.blur_level, 1);
    assert!(cfg.pipeline.image.is_none());

    let retry = cfg.retry_policy();
    assert_eq!(retry.initial_delay, Duration::from_secs(30));
    assert_eq!(retry.max_delay, Duration::from_secs(5 * 60 * 60));
}

#[test]
fn full_file_is_parsed() {
    let file = write_config(
        r#"
[runtime]
workers = 4
retention_secs = 5
cancel_grace_ms = 250

[retry]
max_attempts = 5
backoff = "linear"
initial_delay_ms = 100
max_delay_ms = 1000

[store]
mode = "file"
path = "/var/lib/workchain"

[environment]
storage_low = true

[pipeline]
name = "holiday"
policy = "keep"
blur_level = 3
image = "pictures/lake.png"
scratch_dir = "tmp/blur"
gallery_dir = "out"
"#,
    );
    let cfg = load_and_validate(file.path()).unwrap();

    let options = cfg.runtime_options();
    assert_eq!(options.workers, 4);
    assert_eq!(options.retention, Duration::from_secs(5));
    assert_eq!(options.cancel_grace, Duration::from_millis(250));

    let retry = cfg.retry_policy();
    assert_eq!(retry.max_attempts, 5);
    assert_eq!(retry.backoff, BackoffPolicy::Linear);
    assert_eq!(retry.delay_for(2), Duration::from_millis(200));

    assert_eq!(cfg.store.mode, StoreMode::File);
    assert_eq!(cfg.store.path, PathBuf::from("/var/lib/workchain"));
    assert!(cfg.environment().storage_low);
    assert!(!cfg.environment().battery_low);

    assert_eq!(cfg.pipeline.name, "holiday");
    assert_eq!(cfg.pipeline.policy, UniquenessPolicy::Keep);
    assert_eq!(cfg.pipeline.image.as_deref(), Some("pictures/lake.png"));
    let paths = cfg.image_paths();
    assert_eq!(paths.scratch_dir, PathBuf::from("tmp/blur"));
    assert_eq!(paths.gallery_dir, PathBuf::from("out"));
}

#[test]
fn zero_workers_is_rejected() {
    let file = write_config("[runtime]\nworkers = 0\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, WorkchainError::ConfigError(msg) if msg.contains("workers")));
}

#[test]
fn inverted_retry_delays_are_rejected() {
    let raw = ConfigFileBuilder::new()
        .backoff(BackoffPolicy::Linear, 5_000, 1_000)
        .raw();
    let err = ConfigFile::try_from(raw).unwrap_err();
    assert!(matches!(err, WorkchainError::ConfigError(msg) if msg.contains("initial_delay_ms")));
}

#[test]
fn zero_attempts_and_zero_blur_are_rejected() {
    let raw = ConfigFileBuilder::new().max_attempts(0).raw();
    assert!(ConfigFile::try_from(raw).is_err());

    let raw = ConfigFileBuilder::new()
        .pipeline("img", UniquenessPolicy::Replace, 0)
        .raw();
    assert!(ConfigFile::try_from(raw).is_err());

    let raw = ConfigFileBuilder::new()
        .pipeline("  ", UniquenessPolicy::Replace, 1)
        .raw();
    assert!(ConfigFile::try_from(raw).is_err());
}

#[test]
fn unknown_policy_is_a_toml_error() {
    let file = write_config("[pipeline]\npolicy = \"merge\"\n");
    let err = load_from_path(file.path()).unwrap_err();
    assert!(matches!(err, WorkchainError::TomlError(_)));
}

#[test]
fn explicit_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(Some(dir.path().join("nope.toml").as_path())).unwrap_err();
    assert!(matches!(err, WorkchainError::IoError(_)));
}

#[test]
fn builder_produces_valid_config() {
    let cfg = ConfigFileBuilder::new()
        .workers(3)
        .store(StoreMode::File, "state")
        .storage_low(true)
        .build();

    assert_eq!(cfg.runtime_options().workers, 3);
    assert_eq!(cfg.store.path, PathBuf::from("state"));
    assert!(cfg.environment().storage_low);
}

#[test]
fn cli_flags_are_parsed() {
    let args = CliArgs::try_parse_from([
        "workchain",
        "--image",
        "lake.png",
        "--blur-level",
        "2",
        "--policy",
        "append",
        "--log-level",
        "debug",
        "--dry-run",
    ])
    .unwrap();

    assert_eq!(args.image.as_deref(), Some("lake.png"));
    assert_eq!(args.blur_level, Some(2));
    assert_eq!(args.policy, Some(UniquenessPolicy::Append));
    assert_eq!(args.log_level.map(|l| l.as_str()), Some(LogLevel::Debug.as_str()));
    assert!(args.dry_run);
    assert!(args.config.is_none());
}

#[test]
fn cli_rejects_unknown_policy() {
    assert!(CliArgs::try_parse_from(["workchain", "--policy", "merge"]).is_err());
}

#[tokio::test]
async fn run_refuses_a_chain_the_configured_environment_blocks() {
    let file = write_config(
        r#"
[environment]
storage_low = true
"#,
    );
    let config = file.path().display().to_string();
    let args = CliArgs::try_parse_from(["workchain", "--config", &config, "--image", "lake.png"])
        .unwrap();

    let err = workchain::run(args).await.unwrap_err().to_string();
    assert!(err.contains("save_image"), "{err}");
    assert!(err.contains("storage_not_low"), "{err}");
}
