// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WorkchainError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WorkchainError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_runtime(cfg)?;
    validate_retry(cfg)?;
    validate_pipeline(cfg)?;
    Ok(())
}

fn validate_runtime(cfg: &RawConfigFile) -> Result<()> {
    if cfg.runtime.workers == 0 {
        return Err(config_error("[runtime].workers must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_retry(cfg: &RawConfigFile) -> Result<()> {
    if cfg.retry.max_attempts == 0 {
        return Err(config_error("[retry].max_attempts must be >= 1 (got 0)"));
    }
    if cfg.retry.initial_delay_ms > cfg.retry.max_delay_ms {
        return Err(config_error(format!(
            "[retry].initial_delay_ms ({}) must not exceed max_delay_ms ({})",
            cfg.retry.initial_delay_ms, cfg.retry.max_delay_ms
        )));
    }
    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.name.trim().is_empty() {
        return Err(config_error("[pipeline].name must not be empty"));
    }
    if cfg.pipeline.blur_level == 0 {
        return Err(config_error("[pipeline].blur_level must be >= 1 (got 0)"));
    }
    Ok(())
}

fn config_error(msg: impl Into<String>) -> WorkchainError {
    WorkchainError::ConfigError(msg.into())
}
