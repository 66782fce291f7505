//! Balancer engine
//!
//! Wires the pieces together:
//! 1. Load OST utilization once (nothing starts without a ranking)
//! 2. Fix the source OSTs: the `search_targets` fullest ones
//! 3. Start the refresh loop, the status line, the workers and discovery
//! 4. Run until discovery is exhausted and the queue drained, a fatal error
//!    occurs, or shutdown is requested

use indicatif::DecimalBytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::client::{ClientError, FilesystemClient, TargetSet};
use crate::config::RebalancerConfig;
use crate::discovery::CandidateDiscoverer;
use crate::policy::StripePolicy;
use crate::progress::{ProgressCounters, ProgressReporter, ProgressSnapshot};
use crate::utilization::UtilizationTracker;
use crate::worker::{MigrationWorker, WorkerContext};

/// Fatal engine errors
#[derive(Error, Debug)]
pub enum RebalancerError {
    #[error("OST utilization query failed: {0}")]
    Query(#[source] ClientError),

    #[error("Candidate search failed: {0}")]
    Discovery(#[source] ClientError),

    #[error("Utilization report lists no OSTs")]
    NoTargets,

    #[error("Background task failed: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = std::result::Result<T, RebalancerError>;

fn joined<T>(result: std::result::Result<T, JoinError>) -> Result<T> {
    result.map_err(|e| RebalancerError::TaskPanicked(e.to_string()))
}

fn refresh_result(
    result: std::result::Result<std::result::Result<(), ClientError>, JoinError>,
) -> Result<()> {
    joined(result).and_then(|r| r.map_err(RebalancerError::Query))
}

/// Log a panicked background task; returns whether it panicked
fn log_panic<T>(task: &str, result: std::result::Result<T, JoinError>) -> bool {
    match result {
        Ok(_) => false,
        Err(e) => {
            error!(task, error = %e, "Background task panicked");
            true
        }
    }
}

/// Record the first fatal error and stop intake
fn fail(outcome: &mut Result<u64>, e: RebalancerError, cancel: &CancellationToken) {
    error!(error = %e, "Fatal error, stopping");
    cancel.cancel();
    if outcome.is_ok() {
        *outcome = Err(e);
    }
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// OSTs the candidate search ran against
    pub sources: TargetSet,
    /// Paths handed to the workers
    pub queued: u64,
    /// Final counters
    pub progress: ProgressSnapshot,
    /// Stopped by a shutdown request rather than running out of candidates
    pub interrupted: bool,
}

impl RunSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} candidates from OSTs {}: {} migrated ({}), {} failed, {} skipped{}",
            self.queued,
            self.sources,
            self.progress.files_migrated,
            DecimalBytes(self.progress.bytes_migrated),
            self.progress.files_failed,
            self.progress.files_skipped,
            if self.interrupted { ", interrupted" } else { "" }
        )
    }
}

/// The balancer service
pub struct Rebalancer {
    config: RebalancerConfig,
    client: Arc<dyn FilesystemClient>,
    tracker: Arc<UtilizationTracker>,
    policy: Arc<StripePolicy>,
    counters: Arc<ProgressCounters>,
    show_progress: bool,
}

impl Rebalancer {
    /// Create a balancer with the default stripe policy and no status line
    pub fn new(config: RebalancerConfig, client: Arc<dyn FilesystemClient>) -> Self {
        Self {
            config,
            client,
            tracker: Arc::new(UtilizationTracker::new()),
            policy: Arc::new(StripePolicy::default()),
            counters: Arc::new(ProgressCounters::new()),
            show_progress: false,
        }
    }

    pub fn with_policy(mut self, policy: StripePolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Draw the status line on stderr
    pub fn with_progress_display(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run one balancing pass.
    ///
    /// `shutdown` stops intake of new candidates; migrations already running
    /// are allowed to finish.
    #[instrument(skip_all, fields(mount = %self.config.mount_point.display()))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<RunSummary> {
        let targets = self
            .tracker
            .refresh(self.client.as_ref())
            .await
            .map_err(RebalancerError::Query)?;
        if targets == 0 {
            return Err(RebalancerError::NoTargets);
        }

        let sources = self.tracker.most_utilized(self.config.search_targets);
        info!(
            targets,
            sources = %sources,
            min_size = %self.config.min_size,
            workers = self.config.workers,
            "Initial utilization loaded"
        );

        let cancel = shutdown.child_token();

        let mut refresh = {
            let tracker = self.tracker.clone();
            let client = self.client.clone();
            let period = self.config.refresh_interval();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tracker
                    .run_refresh_loop(client.as_ref(), period, cancel)
                    .await
            })
        };

        let reporter = {
            let reporter = if self.show_progress {
                ProgressReporter::new(sources.clone(), self.config.report_interval())
            } else {
                ProgressReporter::hidden(sources.clone(), self.config.report_interval())
            };
            let counters = self.counters.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { reporter.run(&counters, cancel).await })
        };

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let ctx = WorkerContext {
            client: self.client.clone(),
            tracker: self.tracker.clone(),
            policy: self.policy.clone(),
            counters: self.counters.clone(),
        };
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = MigrationWorker::new(id, ctx.clone());
            let rx = rx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { worker.run(rx, cancel).await });
        }

        let discoverer = CandidateDiscoverer::new(
            self.client.clone(),
            sources.clone(),
            self.config.min_size.clone(),
        );
        let mut discovery = tokio::spawn(discoverer.run(tx, cancel.clone()));

        let mut refresh_finished = false;
        let mut outcome = tokio::select! {
            res = &mut discovery => {
                joined(res).and_then(|r| r.map_err(RebalancerError::Discovery))
            }
            res = &mut refresh => {
                refresh_finished = true;
                match refresh_result(res) {
                    // Loop only returns Ok once cancelled; discovery stops too
                    Ok(()) => joined((&mut discovery).await)
                        .and_then(|r| r.map_err(RebalancerError::Discovery)),
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Fatal error, stopping");
            cancel.cancel();
            discovery.abort();
        }

        // Discovery dropped its sender, so workers exit once the queue drains.
        // Refreshes keep running meanwhile and a failure still stops the run.
        loop {
            tokio::select! {
                res = workers.join_next() => match res {
                    Some(res) => {
                        log_panic("migration worker", res);
                    }
                    None => break,
                },
                res = &mut refresh, if !refresh_finished => {
                    refresh_finished = true;
                    if let Err(e) = refresh_result(res) {
                        fail(&mut outcome, e, &cancel);
                    }
                }
            }
        }

        cancel.cancel();
        if !refresh_finished {
            if let Err(e) = refresh_result(refresh.await) {
                fail(&mut outcome, e, &cancel);
            }
        }
        log_panic("progress reporter", reporter.await);

        let queued = outcome?;
        let summary = RunSummary {
            sources,
            queued,
            progress: self.counters.snapshot(),
            interrupted: shutdown.is_cancelled(),
        };
        info!(summary = %summary.summary(), "Balancing pass complete");
        Ok(summary)
    }
}
