//! The monitor loop.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use shardpilot_actuator::Actuator;
use shardpilot_core::config::{MonitorConfig, ThresholdConfig};
use shardpilot_core::Action;
use shardpilot_metrics::{GangliaClient, MetricsSnapshot};
use shardpilot_policy::ClusterPolicy;

/// Polls metrics, decides, and dispatches actuations.
pub struct Monitor {
    /// Policy state shared with actuation tasks; the mutex keeps a
    /// single-writer discipline between the loop and the one completion
    /// task that can be in flight.
    policy: Arc<Mutex<ClusterPolicy>>,
    actuator: Arc<Actuator>,
    client: GangliaClient,
    thresholds: ThresholdConfig,
    delta_metrics: Vec<String>,
    interval: Duration,
}

impl Monitor {
    pub fn new(
        policy: Arc<Mutex<ClusterPolicy>>,
        actuator: Arc<Actuator>,
        client: GangliaClient,
        config: &MonitorConfig,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            policy,
            actuator,
            client,
            thresholds,
            delta_metrics: config.delta_metrics.clone(),
            interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Run until the shutdown channel fires. Cycle errors never
    /// terminate the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "monitoring started");
        let mut baseline: Option<MetricsSnapshot> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.cycle(&mut baseline).await {
                        error!(error = %format!("{e:#}"), "monitor cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One poll-decide-dispatch cycle.
    async fn cycle(&self, baseline: &mut Option<MetricsSnapshot>) -> anyhow::Result<()> {
        let mut snapshot = self.client.fetch().await?;

        let Some(previous) = baseline.as_ref() else {
            // The very first cycle only seeds the delta baseline.
            *baseline = Some(snapshot);
            return Ok(());
        };

        let raw = snapshot.clone();
        snapshot.apply_deltas(previous, &self.delta_metrics);

        let action = {
            let mut policy = self.policy.lock().await;
            policy.calc_reward(&snapshot, &self.thresholds.add, &self.thresholds.remove);
            policy.solve()
        };
        let tag = action_tag();
        info!(action = %action, tag, "action decided");

        if action != Action::Nop && self.actuator.is_available() {
            self.dispatch(action, tag);
        } else {
            let status = if action == Action::Nop {
                "settled"
            } else {
                "aborted: busy actuator"
            };
            info!(action = %action, tag, status, "no actuation dispatched");
        }

        // Rate baselines always come from raw counters, not from the
        // already-diffed snapshot.
        *baseline = Some(raw);
        Ok(())
    }

    /// Fire-and-forget actuation; the task commits the outcome.
    fn dispatch(&self, action: Action, tag: String) {
        let policy = self.policy.clone();
        let actuator = self.actuator.clone();

        tokio::spawn(async move {
            match actuator.execute(action, &tag, false).await {
                Ok(ok) => {
                    let status = if ok { "succeeded" } else { "failed" };
                    info!(action = %action, tag, status, "actuation finished");

                    let mut policy = policy.lock().await;
                    if let Err(e) = policy.commit_action_result(ok, action) {
                        // Caller bug: the action was illegal for the
                        // committed state. Surfaced loudly, not retried.
                        error!(action = %action, tag, error = %e, "commit rejected");
                    }
                }
                Err(e) => {
                    warn!(action = %action, tag, error = %e, "actuation aborted");
                }
            }
        });
    }
}

/// Short hex tag correlating a decision with its actuation logs.
fn action_tag() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    format!("{:05x}", nanos & 0xf_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardpilot_actuator::{CommandOutput, CommandRunner, CommandSpec};
    use shardpilot_core::config::{ClusterConfig, ScriptsConfig};
    use shardpilot_core::{MetricScope, ThresholdRule, Trigger};
    use std::sync::Mutex as StdMutex;
    use tokio::io::AsyncWriteExt;

    /// Answers every topology query with two registered sets and lets
    /// every provisioning command succeed.
    struct StaticRunner {
        calls: StdMutex<Vec<String>>,
    }

    const TWO_SETS: &str = r#"[
        {"_id": "ShardReplSet1", "host": "ShardReplSet1/db-1:27100,db-2:27101,db-3:27102"},
        {"_id": "ShardReplSet2", "host": "ShardReplSet2/db-1:27103,db-2:27104,db-3:27105"}
    ]"#;

    impl CommandRunner for StaticRunner {
        fn run(
            &self,
            spec: &CommandSpec,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = std::io::Result<CommandOutput>> + Send>,
        > {
            self.calls.lock().unwrap().push(spec.program.clone());
            let stdout = if spec.program == "mongo" {
                TWO_SETS.to_string()
            } else {
                String::new()
            };
            Box::pin(async move {
                Ok(CommandOutput {
                    stdout,
                    stderr: String::new(),
                })
            })
        }
    }

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            shard_hosts: vec!["db-1".into(), "db-2".into(), "db-3".into()],
            base_shard_port: 27100,
            repl_set_members: 3,
            mongos_conn: "10.0.0.5:27017".into(),
            max_shards: 10,
        }
    }

    fn scripts() -> ScriptsConfig {
        ScriptsConfig {
            scripts_dir: "/opt/sp/scripts".into(),
            mongodb_dir: "/var/lib/mongodb".into(),
            start_shard: "/opt/sp/scripts/start_shard.sh".into(),
            add_shard: "/opt/sp/scripts/add_shard.sh".into(),
            stop_shard: "/opt/sp/scripts/stop_shard.sh".into(),
            rmv_shard: "/opt/sp/scripts/rmv_shard.sh".into(),
            restart_telemetry: "/opt/sp/scripts/restart_gmond.sh".into(),
        }
    }

    fn monitor_config(port: u16, interval_secs: u64) -> MonitorConfig {
        MonitorConfig {
            ganglia_host: "127.0.0.1".into(),
            ganglia_port: port,
            poll_interval_secs: interval_secs,
            ignore_hosts: Vec::new(),
            delta_metrics: Vec::new(),
        }
    }

    /// Serve the same XML dump on every connection.
    async fn serve_xml(xml: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let _ = sock.write_all(xml.as_bytes()).await;
                });
            }
        });
        port
    }

    const OVERLOADED: &str = r#"<GANGLIA_XML>
      <HOST NAME="db-1">
        <METRIC NAME="shard1_op_count_query" VAL="9000" TYPE="uint32"/>
      </HOST>
    </GANGLIA_XML>"#;

    const QUIET: &str = r#"<GANGLIA_XML>
      <HOST NAME="db-1">
        <METRIC NAME="shard1_op_count_query" VAL="10" TYPE="uint32"/>
      </HOST>
    </GANGLIA_XML>"#;

    fn overload_thresholds() -> ThresholdConfig {
        ThresholdConfig {
            add: vec![ThresholdRule {
                metric: "op_count_query".into(),
                scope: MetricScope::Shard,
                trigger: Trigger::Above,
                value: 500.0,
            }],
            remove: Vec::new(),
        }
    }

    async fn run_monitor_for(
        xml: &'static str,
        thresholds: ThresholdConfig,
        cycles_worth: Duration,
    ) -> (Arc<Mutex<ClusterPolicy>>, Arc<StaticRunner>) {
        let port = serve_xml(xml).await;
        let runner = Arc::new(StaticRunner {
            calls: StdMutex::new(Vec::new()),
        });
        let actuator = Arc::new(Actuator::with_runner(cluster(), scripts(), runner.clone()));
        let policy = Arc::new(Mutex::new(ClusterPolicy::new(2, 10).unwrap()));

        let config = monitor_config(port, 0); // Zero-length sleeps: cycles run back to back.
        let monitor = Monitor::new(
            policy.clone(),
            actuator,
            GangliaClient::new("127.0.0.1", port, &[]),
            &config,
            thresholds,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });
        tokio::time::sleep(cycles_worth).await;
        let _ = shutdown_tx.send(true);
        let _ = handle.await;

        (policy, runner)
    }

    #[tokio::test]
    async fn quiet_cluster_never_dispatches() {
        let (policy, runner) =
            run_monitor_for(QUIET, overload_thresholds(), Duration::from_millis(200)).await;

        // No provisioning command ever ran.
        assert!(runner.calls.lock().unwrap().is_empty());
        let policy = policy.lock().await;
        assert_eq!(policy.current_shards(), 2);
        assert_eq!(policy.stats().add_attempted, 100); // Untouched prior.
    }

    #[tokio::test]
    async fn overload_dispatches_an_add_and_commits() {
        let (policy, runner) =
            run_monitor_for(OVERLOADED, overload_thresholds(), Duration::from_millis(500)).await;

        // The actuation ran: topology queries plus start/register scripts.
        let calls = runner.calls.lock().unwrap();
        assert!(calls.iter().any(|p| p.ends_with("start_shard.sh")));
        assert!(calls.iter().any(|p| p.ends_with("add_shard.sh")));
        drop(calls);

        // Static topology means validation reports "no effect", so the
        // commit records a failed attempt and the state stays put.
        let policy = policy.lock().await;
        assert!(policy.stats().add_attempted > 100);
        assert_eq!(policy.stats().add_succeeded, 99);
        assert_eq!(policy.current_shards(), 2);
    }

    #[tokio::test]
    async fn unreachable_metrics_source_keeps_looping() {
        // Nothing listens on this port; every fetch fails, every cycle
        // logs and continues, and shutdown still lands cleanly.
        let runner = Arc::new(StaticRunner {
            calls: StdMutex::new(Vec::new()),
        });
        let actuator = Arc::new(Actuator::with_runner(cluster(), scripts(), runner.clone()));
        let policy = Arc::new(Mutex::new(ClusterPolicy::new(2, 10).unwrap()));
        let config = monitor_config(1, 0);

        let monitor = Monitor::new(
            policy,
            actuator,
            GangliaClient::new("127.0.0.1", 1, &[]),
            &config,
            ThresholdConfig::default(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn action_tags_are_short_hex() {
        let tag = action_tag();
        assert_eq!(tag.len(), 5);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
