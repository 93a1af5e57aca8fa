//! shardpilotd — the ShardPilot daemon.
//!
//! Single binary with two entry points:
//! - `monitor` runs the autoscaling control loop (metrics poll, policy
//!   decision, actuation dispatch) until interrupted.
//! - `actuate` runs one scaling action against the cluster and exits.
//!
//! # Usage
//!
//! ```text
//! shardpilotd monitor --config /etc/shardpilot/shardpilot.toml
//! shardpilotd actuate add --config /etc/shardpilot/shardpilot.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{watch, Mutex};
use tracing::info;

use shardpilot_actuator::Actuator;
use shardpilot_core::types::Action;
use shardpilot_core::PilotConfig;
use shardpilot_metrics::GangliaClient;
use shardpilot_monitor::Monitor;
use shardpilot_policy::ClusterPolicy;

#[derive(Parser)]
#[command(name = "shardpilotd", about = "ShardPilot autoscaling daemon")]
struct Cli {
    /// Path to the shardpilot.toml configuration file.
    #[arg(long, default_value = "shardpilot.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor loop until interrupted.
    Monitor,

    /// Execute a single scaling action and exit.
    Actuate {
        /// Action to run: "add" or "rmv".
        action: Action,

        /// Plan and log the commands without running them.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shardpilotd=debug,shardpilot=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = PilotConfig::from_file(&cli.config)?;

    match cli.command {
        Command::Monitor => run_monitor(config).await,
        Command::Actuate { action, dry_run } => run_actuate(config, action, dry_run).await,
    }
}

async fn run_monitor(config: PilotConfig) -> anyhow::Result<()> {
    info!("ShardPilot daemon starting in monitor mode");

    let actuator = Arc::new(Actuator::new(
        config.cluster.clone(),
        config.scripts.clone(),
    ));

    // The live shard count seeds the policy state. Zero (mongos down or
    // an empty cluster) or anything past max_shards is fatal; nothing
    // this loop does can recover from a broken topology query.
    let current = actuator.current_shard_number().await;
    let policy = ClusterPolicy::new(current, config.cluster.max_shards).map_err(|e| {
        anyhow::anyhow!("cluster reports {current} shards, cannot start policy: {e}")
    })?;
    info!(
        shards = current,
        max_shards = config.cluster.max_shards,
        "policy initialized"
    );

    let client = GangliaClient::new(
        config.monitor.ganglia_host.clone(),
        config.monitor.ganglia_port,
        &config.monitor.ignore_hosts,
    );

    let monitor = Monitor::new(
        Arc::new(Mutex::new(policy)),
        actuator,
        client,
        &config.monitor,
        config.threshold.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await;

    info!("ShardPilot daemon stopped");
    Ok(())
}

async fn run_actuate(config: PilotConfig, action: Action, dry_run: bool) -> anyhow::Result<()> {
    let actuator = Actuator::new(config.cluster.clone(), config.scripts.clone());

    info!(action = action.as_str(), dry_run, "running one-shot actuation");
    let ok = actuator.execute(action, "cli", dry_run).await?;

    println!("Successful execution: {ok}");
    println!("Current shards: {}", actuator.current_shard_number().await);
    Ok(())
}
