//! Actuator error types.

use shardpilot_core::Action;
use thiserror::Error;

/// Result type alias for actuator operations.
pub type ActuatorResult<T> = Result<T, ActuatorError>;

/// Errors that can occur while planning or executing an actuation.
///
/// `Busy` is a policy precondition violation for the immediate caller,
/// never retried automatically; the rest are transient faults that abort
/// the current action only.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("actuator is busy, an actuation is already in flight")]
    Busy,

    #[error("no shard replica sets registered")]
    NoShards,

    #[error("action '{0}' cannot be actuated")]
    Unsupported(Action),

    #[error("topology error: {0}")]
    Topology(String),

    #[error("command io error: {0}")]
    Io(#[from] std::io::Error),
}
