//! Snapshot model — per-host and per-shard metric maps.

use std::collections::BTreeMap;

use tracing::debug;

/// A scalar metric value, typed per the stream's `TYPE` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Float(f64),
    Int(i64),
    /// Non-numeric metrics (os name, machine type). Never compared
    /// against thresholds.
    Text(String),
}

impl MetricValue {
    /// Numeric view for threshold comparison; `None` for text metrics.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(v) => Some(*v),
            MetricValue::Int(v) => Some(*v as f64),
            MetricValue::Text(_) => None,
        }
    }

    /// In-place delta against the previous poll's value.
    ///
    /// Same-typed values keep their type; mixed numeric types fall back
    /// to float. Text values are left untouched.
    pub fn subtract(&mut self, previous: &MetricValue) {
        match (&mut *self, previous) {
            (MetricValue::Int(cur), MetricValue::Int(prev)) => *cur -= prev,
            (MetricValue::Float(cur), MetricValue::Float(prev)) => *cur -= prev,
            (MetricValue::Float(cur), MetricValue::Int(prev)) => *cur -= *prev as f64,
            (MetricValue::Int(cur), MetricValue::Float(prev)) => {
                *self = MetricValue::Float(*cur as f64 - prev);
            }
            _ => {}
        }
    }
}

/// Everything reported by one host: flat scalars plus per-shard counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostMetrics {
    pub metrics: BTreeMap<String, MetricValue>,
    pub shards: BTreeMap<String, BTreeMap<String, MetricValue>>,
}

impl HostMetrics {
    /// Host-scoped numeric metric, if present.
    pub fn host_value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::as_f64)
    }
}

/// One poll of the whole cluster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub hosts: BTreeMap<String, HostMetrics>,
}

impl MetricsSnapshot {
    /// Record one metric under `host`, nesting `shard<id>_<name>` values
    /// under that shard.
    pub fn insert_metric(&mut self, host: &str, name: &str, value: MetricValue) {
        let entry = self.hosts.entry(host.to_string()).or_default();

        if let Some(rest) = name.strip_prefix("shard") {
            if let Some((id_part, metric)) = rest.split_once('_') {
                let shard = format!("shard{id_part}");
                entry
                    .shards
                    .entry(shard)
                    .or_default()
                    .insert(metric.to_string(), value);
                return;
            }
        }

        entry.metrics.insert(name.to_string(), value);
    }

    /// Turn cumulative counters into per-interval rates by subtracting
    /// the previous snapshot in place.
    ///
    /// A rate metric with no baseline (a shard or host that appeared
    /// since the last poll) is dropped for this cycle rather than left
    /// as a raw counter.
    pub fn apply_deltas(&mut self, previous: &MetricsSnapshot, rate_metrics: &[String]) {
        for (host, host_metrics) in &mut self.hosts {
            let prev_host = previous.hosts.get(host);

            for (shard, metrics) in &mut host_metrics.shards {
                let prev_shard = prev_host.and_then(|p| p.shards.get(shard));

                for name in rate_metrics {
                    if !metrics.contains_key(name) {
                        continue;
                    }
                    match prev_shard.and_then(|p| p.get(name)) {
                        Some(prev) => {
                            if let Some(cur) = metrics.get_mut(name) {
                                cur.subtract(prev);
                            }
                        }
                        None => {
                            metrics.remove(name);
                            debug!(%host, %shard, metric = %name, "no delta baseline, dropped");
                        }
                    }
                }
            }
        }
    }
}
