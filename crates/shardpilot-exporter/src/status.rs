//! serverStatus polling with an explicit TTL cache.
//!
//! The legacy mongo shell prints pseudo-JSON with `NumberLong(..)`-style
//! wrappers; those are stripped before parsing. One serverStatus call
//! feeds every exported metric, so the document is cached for a short
//! TTL instead of being fetched thirteen times per poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use shardpilot_actuator::{CommandRunner, CommandSpec, ProcessRunner};
use tracing::debug;

/// Exported metric name suffix → path into the serverStatus document.
pub const DESCRIPTORS: &[(&str, [&str; 2])] = &[
    ("conn_current", ["connections", "current"]),
    ("conn_available", ["connections", "available"]),
    ("conn_total", ["connections", "totalCreated"]),
    ("net_bytes_in", ["network", "bytesIn"]),
    ("net_bytes_out", ["network", "bytesOut"]),
    ("op_count_insert", ["opcounters", "insert"]),
    ("op_count_query", ["opcounters", "query"]),
    ("op_count_update", ["opcounters", "update"]),
    ("op_count_delete", ["opcounters", "delete"]),
    ("op_count_getmore", ["opcounters", "getmore"]),
    ("op_count_command", ["opcounters", "command"]),
    ("mem_resident", ["mem", "resident"]),
    ("mem_virtual", ["mem", "virtual"]),
];

/// Strip shell object wrappers so the output parses as JSON.
pub fn clean_shell_json(raw: &str) -> String {
    // Compiled per call; the exporter polls once a second at most.
    let wrappers = Regex::new(r"(?:NumberLong|ISODate|ObjectId)\(([^)]*)\)").unwrap();
    let timestamps = Regex::new(r"Timestamp\(([^)]*)\)").unwrap();

    let cleaned = wrappers.replace_all(raw, "$1");
    timestamps.replace_all(&cleaned, "\"($1)\"").into_owned()
}

struct CachedStatus {
    fetched_at: Instant,
    status: serde_json::Value,
}

/// Polls one mongod for its serverStatus document.
pub struct MongodStatus {
    runner: Arc<dyn CommandRunner>,
    host: String,
    port: u16,
    ttl: Duration,
    cached: Option<CachedStatus>,
}

impl MongodStatus {
    pub fn new(host: impl Into<String>, port: u16, ttl: Duration) -> Self {
        Self::with_runner(host, port, ttl, Arc::new(ProcessRunner))
    }

    pub fn with_runner(
        host: impl Into<String>,
        port: u16,
        ttl: Duration,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            runner,
            host: host.into(),
            port,
            ttl,
            cached: None,
        }
    }

    /// One exported counter, by descriptor suffix.
    pub async fn metric(&mut self, descriptor: &str) -> anyhow::Result<i64> {
        let [k1, k2] = DESCRIPTORS
            .iter()
            .find(|(name, _)| *name == descriptor)
            .map(|(_, path)| *path)
            .ok_or_else(|| anyhow::anyhow!("unknown descriptor '{descriptor}'"))?;

        let status = self.status().await?;
        status[k1][k2]
            .as_i64()
            .or_else(|| status[k1][k2].as_f64().map(|v| v as i64))
            .ok_or_else(|| anyhow::anyhow!("serverStatus missing {k1}.{k2}"))
    }

    /// The serverStatus document, refetched only when the cache is
    /// older than the TTL.
    async fn status(&mut self) -> anyhow::Result<&serde_json::Value> {
        let stale = self
            .cached
            .as_ref()
            .is_none_or(|c| c.fetched_at.elapsed() >= self.ttl);

        if stale {
            let spec = CommandSpec::new(
                "mongo",
                vec![
                    "--host".into(),
                    self.host.clone(),
                    "--port".into(),
                    self.port.to_string(),
                    "--quiet".into(),
                    "--eval".into(),
                    "JSON.stringify(db.serverStatus())".into(),
                ],
            );
            let output = self.runner.run(&spec).await?;
            if output.failed() {
                anyhow::bail!("serverStatus query: {}", output.stderr.trim());
            }

            let status: serde_json::Value =
                serde_json::from_str(clean_shell_json(&output.stdout).trim())?;
            self.cached = Some(CachedStatus {
                fetched_at: Instant::now(),
                status,
            });
            debug!(host = %self.host, port = self.port, "serverStatus refreshed");
        }

        Ok(&self.cached.as_ref().unwrap().status)
    }
}
