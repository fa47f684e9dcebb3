//! Master binary

use clap::{Parser, Subcommand};
use minigfs::{Master, MasterConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minigfs-master")]
#[command(about = "minigfs coordination master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master server
    Serve {
        /// Bind address for the HTTP API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Operation log path
        #[arg(long)]
        log: Option<PathBuf>,

        /// Target replica count per chunk
        #[arg(long)]
        replicas: Option<usize>,

        /// Expected heartbeat interval in seconds
        #[arg(long)]
        heartbeat_interval: Option<u64>,

        /// Missed intervals before a suspect node is declared dead
        #[arg(long)]
        miss_threshold: Option<u32>,

        /// Lease duration in seconds
        #[arg(long)]
        lease_duration: Option<u64>,

        /// Reconciliation period in seconds
        #[arg(long)]
        reconcile_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            log,
            replicas,
            heartbeat_interval,
            miss_threshold,
            lease_duration,
            reconcile_interval,
        } => {
            // Config file and environment first, CLI flags take priority
            let mut config = MasterConfig::load()?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(log) = log {
                config.log_path = log;
            }
            if let Some(replicas) = replicas {
                config.replicas = replicas;
            }
            if let Some(interval) = heartbeat_interval {
                config.heartbeat_interval_secs = interval;
            }
            if let Some(threshold) = miss_threshold {
                config.miss_threshold = threshold;
            }
            if let Some(duration) = lease_duration {
                config.lease_duration_secs = duration;
            }
            if let Some(interval) = reconcile_interval {
                config.reconcile_interval_secs = interval;
            }

            let master = Master::new(config);
            master.serve().await?;
        }
    }

    Ok(())
}
