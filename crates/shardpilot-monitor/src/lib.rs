//! shardpilot-monitor — the control loop tying policy to actuation.
//!
//! Each cycle: sleep, poll a fresh metrics snapshot, turn cumulative
//! counters into rates, let the policy decide, and, when the decision
//! is actionable and the actuator is free, dispatch the actuation as a
//! detached task. The loop never awaits an actuation; the task commits
//! its outcome back into the policy under the same lock the loop uses.
//!
//! Any per-cycle error is caught at the loop boundary, logged, and the
//! next cycle starts from scratch.

pub mod monitor;

pub use monitor::Monitor;
