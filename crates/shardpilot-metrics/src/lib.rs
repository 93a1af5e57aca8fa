//! shardpilot-metrics — the telemetry boundary.
//!
//! A ganglia-style monitoring daemon dumps the whole cluster's state as
//! one XML document per TCP connection: `HOST` elements containing
//! `METRIC` elements with `NAME`/`VAL`/`TYPE` attributes. This crate
//! reads that stream, parses it into a [`MetricsSnapshot`], and diffs
//! consecutive snapshots for cumulative (rate-style) counters.
//!
//! Metric names prefixed `shard<id>_` nest under that shard within the
//! host; everything else stays at host level.

pub mod error;
pub mod ganglia;
pub mod snapshot;

pub use error::{MetricsError, MetricsResult};
pub use ganglia::GangliaClient;
pub use snapshot::{HostMetrics, MetricValue, MetricsSnapshot};
