//! shardpilot-exporter — single-host mongod metric exporter.
//!
//! Polls the local mongod's serverStatus document and prints one
//! `<server>_mongodb_<metric>: <value>` line per counter per interval,
//! in the format the monitoring agent's module protocol expects. No
//! decision logic lives here.
//!
//! # Usage
//!
//! ```text
//! shardpilot-exporter --port 27018 --server-name shard1 --interval 1
//! ```

use std::time::Duration;

use clap::Parser;
use tracing::warn;

mod status;

use status::{DESCRIPTORS, MongodStatus};

#[derive(Parser)]
#[command(name = "shardpilot-exporter", about = "mongod counter exporter")]
struct Cli {
    /// mongod host to poll.
    #[arg(long, default_value = "localhost")]
    host: String,

    /// mongod port to poll.
    #[arg(long, default_value = "27017")]
    port: u16,

    /// Prefix for exported metric names.
    #[arg(long, default_value = "mongod_server")]
    server_name: String,

    /// Seconds between polls.
    #[arg(long, default_value = "1")]
    interval: u64,

    /// serverStatus cache lifetime in seconds.
    #[arg(long, default_value = "5")]
    ttl: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let mut source = MongodStatus::new(cli.host.clone(), cli.port, Duration::from_secs(cli.ttl));

    loop {
        for (name, _) in DESCRIPTORS {
            // A failed poll exports 0 rather than a gap.
            let value = match source.metric(name).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(metric = name, error = %format!("{e:#}"), "poll failed");
                    0
                }
            };
            println!("{}_mongodb_{}: {}", cli.server_name, name, value);
        }
        tokio::time::sleep(Duration::from_secs(cli.interval)).await;
    }
}
