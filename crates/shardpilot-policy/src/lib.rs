//! shardpilot-policy — the MDP decision engine.
//!
//! Cluster size is modeled as a finite chain of states (1..=N shards).
//! Each cycle the monitor rebuilds the reward vector from threshold
//! violations, the engine solves the MDP by value iteration, and the
//! action for the current state is handed to the actuator. Completed
//! actuations are committed back, updating the empirical transition
//! probabilities.
//!
//! # Transition model
//!
//! ```text
//! nop: (1.0, s)
//! add: (1 - p_add, s), (p_add, s+1)      p_add = ok_add / attempted_add
//! rmv: (p_rmv, s-1), (1 - p_rmv, s)      p_rmv = ok_rmv / attempted_rmv
//! ```
//!
//! Success ratios start from a smoothed prior (99/100) so early
//! transitions are realistic rather than degenerate.

pub mod engine;
pub mod error;

pub use engine::{ActionStats, ClusterPolicy, DEFAULT_GAMMA};
pub use error::{PolicyError, PolicyResult};
