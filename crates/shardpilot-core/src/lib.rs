//! shardpilot-core — shared domain types and configuration.
//!
//! Everything the other ShardPilot crates agree on lives here: the scaling
//! [`Action`] vocabulary, structured threshold rules, and the
//! `shardpilot.toml` configuration model.

pub mod config;
pub mod types;

pub use config::PilotConfig;
pub use types::*;
