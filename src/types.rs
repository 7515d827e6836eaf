use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What to do when a chain is submitted under a name that is already in flight.
///
/// - `Replace`: cancel the in-flight chain and admit the new one.
/// - `Keep`: leave the in-flight chain alone and drop the submission.
/// - `Append`: run the new stages after the in-flight chain's last stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniquenessPolicy {
    #[default]
    Replace,
    Keep,
    Append,
}

impl FromStr for UniquenessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(UniquenessPolicy::Replace),
            "keep" => Ok(UniquenessPolicy::Keep),
            "append" => Ok(UniquenessPolicy::Append),
            other => Err(format!(
                "invalid uniqueness policy: {other} (expected \"replace\", \"keep\" or \"append\")"
            )),
        }
    }
}

/// How the delay between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    Linear,
    #[default]
    Exponential,
}

/// Where chain state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// One JSON document per chain under `[store].path`.
    File,
    /// Kept in memory only (lost on restart).
    #[default]
    Memory,
}
