//! shardpilot.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::ThresholdRule;

/// Top-level configuration for the monitor daemon and the actuator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotConfig {
    pub cluster: ClusterConfig,
    pub scripts: ScriptsConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
}

/// Cluster topology: which hosts carry shard members and how ports are
/// laid out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Hosts eligible to run shard members, in placement tie-break order.
    pub shard_hosts: Vec<String>,
    /// Port of replica set 1, member 1. Members are laid out contiguously.
    pub base_shard_port: u16,
    /// Members started per replica set.
    pub repl_set_members: u32,
    /// mongos connection string used for topology queries and registration.
    pub mongos_conn: String,
    /// Upper bound of the shard-count state space.
    #[serde(default = "default_max_shards")]
    pub max_shards: u32,
}

/// Paths handed to the provisioning scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    pub scripts_dir: String,
    pub mongodb_dir: String,
    pub start_shard: String,
    pub add_shard: String,
    pub stop_shard: String,
    pub rmv_shard: String,
    pub restart_telemetry: String,
}

/// Monitor loop settings and the metrics boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_ganglia_host")]
    pub ganglia_host: String,
    #[serde(default = "default_ganglia_port")]
    pub ganglia_port: u16,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Hosts dropped from every snapshot (routers, config servers).
    #[serde(default)]
    pub ignore_hosts: Vec<String>,
    /// Per-shard counters reported cumulatively; diffed between polls.
    #[serde(default)]
    pub delta_metrics: Vec<String>,
}

/// Threshold rules, split by the action they vote for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub add: Vec<ThresholdRule>,
    #[serde(default)]
    pub remove: Vec<ThresholdRule>,
}

fn default_max_shards() -> u32 {
    10
}

fn default_ganglia_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ganglia_port() -> u16 {
    8651
}

fn default_poll_interval() -> u64 {
    10
}

impl PilotConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PilotConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup-time sanity checks. Invalid configuration is fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cluster.shard_hosts.is_empty() {
            anyhow::bail!("cluster.shard_hosts must not be empty");
        }
        if self.cluster.repl_set_members == 0 {
            anyhow::bail!("cluster.repl_set_members must be at least 1");
        }
        if self.cluster.max_shards == 0 {
            anyhow::bail!("cluster.max_shards must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricScope, Trigger};

    const SAMPLE: &str = r#"
[cluster]
shard_hosts = ["db-1", "db-2", "db-3"]
base_shard_port = 27100
repl_set_members = 3
mongos_conn = "10.0.0.5:27017"

[scripts]
scripts_dir = "/opt/shardpilot/scripts"
mongodb_dir = "/var/lib/mongodb"
start_shard = "/opt/shardpilot/scripts/start_shard.sh"
add_shard = "/opt/shardpilot/scripts/add_shard.sh"
stop_shard = "/opt/shardpilot/scripts/stop_shard.sh"
rmv_shard = "/opt/shardpilot/scripts/rmv_shard.sh"
restart_telemetry = "/opt/shardpilot/scripts/restart_gmond.sh"

[monitor]
ignore_hosts = ["router-1"]
delta_metrics = ["op_count_insert", "op_count_query"]

[[threshold.add]]
metric = "op_count_query"
scope = "shard"
trigger = "above"
value = 500.0

[[threshold.remove]]
metric = "op_count_query"
scope = "shard"
trigger = "below"
value = 50.0
"#;

    #[test]
    fn parse_sample_config() {
        let config: PilotConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.cluster.shard_hosts.len(), 3);
        assert_eq!(config.cluster.base_shard_port, 27100);
        assert_eq!(config.cluster.max_shards, 10); // Default.
        assert_eq!(config.monitor.poll_interval_secs, 10); // Default.
        assert_eq!(config.monitor.ignore_hosts, vec!["router-1"]);

        let add = &config.threshold.add[0];
        assert_eq!(add.scope, MetricScope::Shard);
        assert_eq!(add.trigger, Trigger::Above);
        assert_eq!(add.value, 500.0);

        assert_eq!(config.threshold.remove[0].trigger, Trigger::Below);
        config.validate().unwrap();
    }

    #[test]
    fn empty_hosts_rejected() {
        let mut config: PilotConfig = toml::from_str(SAMPLE).unwrap();
        config.cluster.shard_hosts.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn thresholds_default_to_empty() {
        let stripped = SAMPLE.split("[[threshold.add]]").next().unwrap();
        let config: PilotConfig = toml::from_str(stripped).unwrap();
        assert!(config.threshold.add.is_empty());
        assert!(config.threshold.remove.is_empty());
    }
}
