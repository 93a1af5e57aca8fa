//! Decision engine error types.

use shardpilot_core::Action;
use thiserror::Error;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors from the decision engine.
///
/// `InvalidTransition` signals a caller bug (an action committed for a
/// state where it is illegal) and must not be swallowed or retried.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("discount factor must be in (0, 1), got {0}")]
    InvalidDiscount(f64),

    #[error("state {state} outside the configured range [1, {max}]")]
    StateOutOfRange { state: u32, max: u32 },

    #[error("action '{action}' at {state} shard(s) would leave the state range")]
    InvalidTransition { state: u32, action: Action },
}
