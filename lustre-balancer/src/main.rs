//! Lustre OST Balancer
//!
//! Finds files on the fullest OSTs of a Lustre mount and migrates them onto
//! the emptiest ones, picking a stripe count from each file's size.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use lustre_balancer::{LfsClient, Rebalancer, RebalancerConfig, SizeFilter};

#[derive(Parser)]
#[command(name = "lustre-balancer", version)]
#[command(about = "Rebalance file data across Lustre OSTs")]
struct Cli {
    /// Lustre mount point
    #[arg(env = "LUSTRE_BALANCER_MOUNT")]
    mountpoint: PathBuf,

    /// Number of most-used OSTs to search for files
    #[arg(short = 'o', long, env = "LUSTRE_BALANCER_OST_SEARCH", default_value = "5")]
    ostsearch: usize,

    /// File size filter in `lfs find --size` syntax
    #[arg(short = 's', long, env = "LUSTRE_BALANCER_MIN_SIZE", default_value = "+1M")]
    size: SizeFilter,

    /// Number of concurrent migrations
    #[arg(long, env = "LUSTRE_BALANCER_WORKERS", default_value = "1")]
    workers: usize,

    /// OST utilization refresh interval in seconds
    #[arg(long, env = "LUSTRE_BALANCER_REFRESH_INTERVAL", default_value = "60")]
    refresh_interval: u64,

    /// Status line update interval in seconds
    #[arg(long, env = "LUSTRE_BALANCER_REPORT_INTERVAL", default_value = "2")]
    report_interval: u64,

    /// Maximum number of discovered files waiting for a worker
    #[arg(long, env = "LUSTRE_BALANCER_QUEUE_CAPACITY", default_value = "1048576")]
    queue_capacity: usize,

    /// Path to the lfs binary
    #[arg(long, env = "LUSTRE_BALANCER_LFS", default_value = "lfs")]
    lfs_path: PathBuf,

    /// Log migrations instead of running them
    #[arg(long, env = "LUSTRE_BALANCER_DRY_RUN")]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> RebalancerConfig {
        RebalancerConfig {
            mount_point: self.mountpoint.clone(),
            search_targets: self.ostsearch,
            min_size: self.size.clone(),
            workers: self.workers,
            refresh_interval_secs: self.refresh_interval,
            report_interval_secs: self.report_interval,
            queue_capacity: self.queue_capacity,
            lfs_path: self.lfs_path.clone(),
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they interleave with the status line
    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = cli.config();
    config.validate().context("Invalid configuration")?;

    info!(
        mount = %config.mount_point.display(),
        ostsearch = config.search_targets,
        size = %config.min_size,
        workers = config.workers,
        dry_run = config.dry_run,
        "Starting Lustre balancer"
    );

    let client = Arc::new(LfsClient::from_config(&config));
    let rebalancer = Rebalancer::new(config, client).with_progress_display(true);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Shutdown signal received, finishing running migrations");
                shutdown.cancel();
            }
        });
    }

    let summary = rebalancer
        .run(shutdown)
        .await
        .context("Balancing failed")?;

    println!("{}", summary.summary());
    Ok(())
}
