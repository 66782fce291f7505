//! Migration workers
//!
//! Each worker pulls candidate paths off the shared queue and, per file:
//! - Stats it (vanished or unreadable files are skipped)
//! - Picks a stripe count from its size
//! - Picks that many of the emptiest OSTs from the live ranking
//! - Runs the migration and counts the result
//!
//! A failed file never stops the worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientError, FilesystemClient, TargetSet};
use crate::policy::StripePolicy;
use crate::progress::ProgressCounters;
use crate::utilization::UtilizationTracker;

/// Queue receiver shared by every worker
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<PathBuf>>>;

/// What happened to one candidate
#[derive(Debug)]
pub enum MigrationOutcome {
    /// Restriped onto `destinations`
    Migrated { size: u64, destinations: TargetSet },
    /// Stat failed; file left alone
    Skipped(std::io::Error),
    /// `lfs migrate` failed
    Failed {
        destinations: TargetSet,
        error: ClientError,
    },
}

impl MigrationOutcome {
    pub fn is_migrated(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated { .. })
    }
}

/// Collaborators shared by all workers
#[derive(Clone)]
pub struct WorkerContext {
    pub client: Arc<dyn FilesystemClient>,
    pub tracker: Arc<UtilizationTracker>,
    pub policy: Arc<StripePolicy>,
    pub counters: Arc<ProgressCounters>,
}

/// One queue consumer
pub struct MigrationWorker {
    id: usize,
    ctx: WorkerContext,
}

impl MigrationWorker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Drain the queue until it closes or `cancel` fires.
    ///
    /// Cancellation is only observed between files, so a migration that has
    /// started is allowed to finish. Returns the number of files handled.
    pub async fn run(&self, queue: SharedReceiver, cancel: CancellationToken) -> u64 {
        let mut handled = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                path = async { queue.lock().await.recv().await } => path,
            };

            let Some(path) = next else {
                break;
            };

            self.migrate(&path).await;
            handled += 1;
        }

        info!(worker = self.id, handled, "Migration worker finished");
        handled
    }

    /// Process one candidate and update the counters
    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn migrate(&self, path: &Path) -> MigrationOutcome {
        let outcome = self.migrate_inner(path).await;

        match &outcome {
            MigrationOutcome::Migrated { size, destinations } => {
                self.ctx.counters.record_migrated(*size);
                debug!(
                    path = %path.display(),
                    size,
                    destinations = %destinations,
                    "File migrated"
                );
            }
            MigrationOutcome::Skipped(e) => {
                self.ctx.counters.record_skipped();
                warn!(path = %path.display(), error = %e, "Cannot stat candidate, skipping");
            }
            MigrationOutcome::Failed {
                destinations,
                error,
            } => {
                self.ctx.counters.record_failed();
                warn!(
                    path = %path.display(),
                    destinations = %destinations,
                    error = %error,
                    "Error migrating file"
                );
            }
        }

        outcome
    }

    async fn migrate_inner(&self, path: &Path) -> MigrationOutcome {
        let size = match self.ctx.client.file_size(path).await {
            Ok(size) => size,
            Err(e) => return MigrationOutcome::Skipped(e),
        };

        let stripe_count = self.ctx.policy.stripe_count(size);
        let destinations = self.ctx.tracker.least_utilized(stripe_count);

        match self.ctx.client.relocate(path, &destinations).await {
            Ok(()) => MigrationOutcome::Migrated { size, destinations },
            Err(error) => MigrationOutcome::Failed {
                destinations,
                error,
            },
        }
    }
}
