//! Lustre OST Balancer Library
//!
//! Moves files off the fullest OSTs of a Lustre filesystem onto the
//! emptiest ones, restriping each file according to its size.
//!
//! The balancer runs as a small pipeline:
//! - Utilization tracking (periodic `lfs df`, ranked by free space)
//! - Candidate discovery (`lfs find` against the fullest OSTs)
//! - Migration workers (`lfs migrate` onto the emptiest OSTs)
//! - Progress reporting (live status line)

pub mod client;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod lfs;
pub mod policy;
pub mod progress;
pub mod size;
pub mod utilization;
pub mod worker;

// Re-export main types
pub use client::{CandidateStream, ClientError, FilesystemClient, TargetSet};
pub use config::{ConfigError, RebalancerConfig};
pub use discovery::CandidateDiscoverer;
pub use engine::{Rebalancer, RebalancerError, RunSummary};
pub use lfs::LfsClient;
pub use policy::{StripePolicy, StripeTier};
pub use progress::{ProgressCounters, ProgressReporter, ProgressSnapshot};
pub use size::{SizeComparison, SizeFilter};
pub use utilization::{Target, UtilizationSnapshot, UtilizationTracker};
pub use worker::{MigrationOutcome, MigrationWorker, WorkerContext};
