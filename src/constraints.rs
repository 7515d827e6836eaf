// src/constraints.rs

//! Constraint evaluation.
//!
//! A [`Constraint`] is a named predicate over the current [`Environment`].
//! The set of predicates is closed: chains may only name the constraints
//! listed here, and unknown names are rejected when the chain is built.
//!
//! The environment itself is supplied from outside (a device-health monitor,
//! the CLI, a test) and pushed into the runtime whenever it changes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::chain::{ChainGraph, TaskDescriptor};

/// Environment signals the constraints are evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Device storage is running low.
    #[serde(default)]
    pub storage_low: bool,
    /// Battery is running low.
    #[serde(default)]
    pub battery_low: bool,
}

impl Environment {
    pub fn with_storage_low(mut self, low: bool) -> Self {
        self.storage_low = low;
        self
    }

    pub fn with_battery_low(mut self, low: bool) -> Self {
        self.battery_low = low;
        self
    }
}

/// A predicate that must hold before a node may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    StorageNotLow,
    BatteryNotLow,
}

impl Constraint {
    pub const ALL: [Constraint; 2] = [Constraint::StorageNotLow, Constraint::BatteryNotLow];

    pub fn name(&self) -> &'static str {
        match self {
            Constraint::StorageNotLow => "storage_not_low",
            Constraint::BatteryNotLow => "battery_not_low",
        }
    }

    pub fn holds(&self, env: &Environment) -> bool {
        match self {
            Constraint::StorageNotLow => !env.storage_low,
            Constraint::BatteryNotLow => !env.battery_low,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Constraint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Constraint::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s.trim())
            .ok_or_else(|| {
                let known: Vec<_> = Constraint::ALL.iter().map(|c| c.name()).collect();
                format!("unknown constraint '{s}' (known: {})", known.join(", "))
            })
    }
}

/// Whether every constraint in `constraints` holds in `env`.
pub fn satisfied(constraints: &BTreeSet<Constraint>, env: &Environment) -> bool {
    constraints.iter().all(|c| c.holds(env))
}

/// The constraints in `constraints` that do not hold in `env`.
pub fn unmet(constraints: &BTreeSet<Constraint>, env: &Environment) -> Vec<Constraint> {
    constraints.iter().copied().filter(|c| !c.holds(env)).collect()
}

/// Nodes of `chain` that `env` would keep `NotReady`, with what they lack.
pub fn blocked<'a>(
    chain: &'a ChainGraph,
    env: &Environment,
) -> Vec<(&'a TaskDescriptor, Vec<Constraint>)> {
    chain
        .nodes()
        .filter_map(|node| {
            let missing = unmet(&node.constraints, env);
            (!missing.is_empty()).then_some((node, missing))
        })
        .collect()
}
