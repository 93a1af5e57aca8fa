//! Shared types used across ShardPilot crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A scaling action chosen by the policy and carried out by the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Leave the cluster as it is.
    Nop,
    /// Provision one replica set and register it as a new shard.
    Add,
    /// Deregister and tear down the highest-indexed shard.
    #[serde(rename = "rmv")]
    Remove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Nop => "nop",
            Action::Add => "add",
            Action::Remove => "rmv",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nop" => Ok(Action::Nop),
            "add" => Ok(Action::Add),
            "rmv" => Ok(Action::Remove),
            other => Err(format!("unknown action '{other}' (expected nop, add, rmv)")),
        }
    }
}

/// Where a threshold rule looks its metric up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricScope {
    /// A host-level scalar (cpu, load, memory, ...).
    Host,
    /// A per-shard counter nested under each host.
    Shard,
}

/// Which side of the threshold counts as a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Violated when the observed value exceeds the threshold.
    Above,
    /// Violated when the observed value falls below the threshold.
    Below,
}

/// One configured threshold: a metric, where to find it, and when it
/// counts as violated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric: String,
    pub scope: MetricScope,
    pub trigger: Trigger,
    pub value: f64,
}

impl ThresholdRule {
    /// True when `observed` violates this rule.
    pub fn violated(&self, observed: f64) -> bool {
        match self.trigger {
            Trigger::Above => observed > self.value,
            Trigger::Below => observed < self.value,
        }
    }
}
