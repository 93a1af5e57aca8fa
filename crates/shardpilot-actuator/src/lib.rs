//! shardpilot-actuator — turns a scaling decision into cluster changes.
//!
//! The actuator queries live shard topology through the mongo shell,
//! builds an ordered provisioning plan (using bucket-fill placement for
//! adds), runs the plan as a fail-fast external command sequence, and
//! validates the outcome by re-deriving the plan from fresh topology.
//!
//! A single busy/available gate serializes actuations: at most one
//! cluster-topology change is ever in flight per process.

pub mod actuator;
pub mod command;
pub mod error;
pub mod topology;

pub use actuator::{Actuator, MemberSlot};
pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use error::{ActuatorError, ActuatorResult};
pub use topology::ReplicaSet;
