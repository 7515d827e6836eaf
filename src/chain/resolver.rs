// src/chain/resolver.rs

//! Reconciles a submission with an existing chain of the same name.

use serde::{Deserialize, Serialize};

use crate::chain::state::ChainState;
use crate::types::UniquenessPolicy;

/// Decision taken for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No chain of that name is in flight; the submission starts fresh.
    Admit,
    /// The submission's stages run after the in-flight chain's last stage.
    Append,
    /// The in-flight chain is cancelled and the submission replaces it.
    ReplaceCancelExisting,
    /// The in-flight chain is kept; the submission is dropped.
    Reject,
}

/// Decide what to do with a submission given the state of the chain that
/// currently owns its name (if any).
///
/// A chain that has already reached a terminal state no longer counts as in
/// flight, whatever the policy.
pub fn resolve(existing: Option<ChainState>, policy: UniquenessPolicy) -> Resolution {
    match existing {
        Some(state) if !state.is_terminal() => match policy {
            UniquenessPolicy::Replace => Resolution::ReplaceCancelExisting,
            UniquenessPolicy::Keep => Resolution::Reject,
            UniquenessPolicy::Append => Resolution::Append,
        },
        _ => Resolution::Admit,
    }
}
