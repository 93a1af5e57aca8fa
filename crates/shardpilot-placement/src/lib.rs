//! ShardPilot placement — even-distribution bucket-fill.
//!
//! This crate decides which hosts receive the members of a new replica
//! set. It does NOT talk to the cluster (that's `shardpilot-actuator`);
//! it is a pure function from current per-host member counts to an
//! ordered host assignment list.

pub mod bucket;

pub use bucket::bucket_fill;
