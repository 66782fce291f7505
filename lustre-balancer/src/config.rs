//! Balancer configuration
//!
//! Built once at startup from the command line (every flag can also come
//! from a `LUSTRE_BALANCER_*` environment variable) and immutable afterwards.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::size::SizeFilter;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Mount point does not exist or is not a directory: {0}")]
    MountNotFound(PathBuf),

    #[error("Invalid size spec: {0:?}")]
    InvalidSize(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Balancer configuration
#[derive(Debug, Clone)]
pub struct RebalancerConfig {
    /// Lustre mount point to balance
    pub mount_point: PathBuf,

    /// Number of most-used OSTs to search for candidate files
    pub search_targets: usize,

    /// Size predicate passed to `lfs find --size`
    pub min_size: SizeFilter,

    /// Number of concurrent migration workers
    pub workers: usize,

    /// Interval between OST utilization refreshes in seconds
    pub refresh_interval_secs: u64,

    /// Interval between status line updates in seconds
    pub report_interval_secs: u64,

    /// Capacity of the discovery → migration queue
    pub queue_capacity: usize,

    /// Path to the `lfs` binary
    pub lfs_path: PathBuf,

    /// Dry run mode (log migrations instead of running them)
    pub dry_run: bool,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::new(),
            search_targets: 5,
            min_size: SizeFilter::default(),
            workers: 1,
            refresh_interval_secs: 60,
            report_interval_secs: 2,
            queue_capacity: 1 << 20,
            lfs_path: PathBuf::from("lfs"),
            dry_run: false,
        }
    }
}

impl RebalancerConfig {
    /// Check values that clap cannot check on its own
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.mount_point.is_dir() {
            return Err(ConfigError::MountNotFound(self.mount_point.clone()));
        }

        let positive = [
            ("ostsearch", self.search_targets as u64),
            ("workers", self.workers as u64),
            ("refresh-interval", self.refresh_interval_secs),
            ("report-interval", self.report_interval_secs),
            ("queue-capacity", self.queue_capacity as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Get refresh interval as Duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Get report interval as Duration
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}
