//! Candidate discovery
//!
//! Runs one file listing against the fullest OSTs (as ranked at startup) and
//! feeds the paths into the migration queue as they arrive.

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::client::{ClientError, FilesystemClient, TargetSet};
use crate::size::SizeFilter;

/// Single-shot producer of candidate paths
pub struct CandidateDiscoverer {
    client: Arc<dyn FilesystemClient>,
    sources: TargetSet,
    size: SizeFilter,
}

impl CandidateDiscoverer {
    /// `sources` is fixed for the life of the discoverer; later utilization
    /// refreshes do not change it.
    pub fn new(client: Arc<dyn FilesystemClient>, sources: TargetSet, size: SizeFilter) -> Self {
        Self {
            client,
            sources,
            size,
        }
    }

    /// Stream every candidate into `queue`.
    ///
    /// Returns the number of paths queued once the listing ends. A listing
    /// that cannot start or exits abnormally is an error. The queue closes
    /// when this returns and `queue` is dropped.
    #[instrument(skip(self, queue, cancel), fields(sources = %self.sources, size = %self.size))]
    pub async fn run(
        self,
        queue: mpsc::Sender<PathBuf>,
        cancel: CancellationToken,
    ) -> Result<u64, ClientError> {
        let mut candidates = self
            .client
            .enumerate_candidates(&self.sources, &self.size)
            .await?;

        info!("Candidate search started");
        let mut queued = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(queued, "Candidate search cancelled");
                    return Ok(queued);
                }
                next = candidates.next() => next,
            };

            let path = match next {
                Some(Ok(path)) => path,
                Some(Err(e)) => return Err(e),
                None => break,
            };

            if path.as_os_str().is_empty() {
                continue;
            }

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(queued),
                sent = queue.send(path) => sent,
            };
            if sent.is_err() {
                debug!("Migration queue closed, stopping candidate search");
                break;
            }
            queued += 1;
        }

        info!(queued, "Candidate search finished");
        Ok(queued)
    }
}
