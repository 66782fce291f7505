//! Migration progress
//!
//! Workers bump lock-free counters; the reporter samples them on a timer and
//! redraws a single status line.

use indicatif::{DecimalBytes, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::TargetSet;

/// Process-wide migration counters
#[derive(Debug, Default)]
pub struct ProgressCounters {
    files_migrated: AtomicU64,
    bytes_migrated: AtomicU64,
    files_failed: AtomicU64,
    files_skipped: AtomicU64,
}

/// Point-in-time copy of [`ProgressCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files_migrated: u64,
    pub bytes_migrated: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful migration of `bytes`
    pub fn record_migrated(&self, bytes: u64) {
        self.files_migrated.fetch_add(1, Ordering::Relaxed);
        self.bytes_migrated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a failed `lfs migrate`
    pub fn record_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a candidate that could not be stat'd
    pub fn record_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_migrated: self.files_migrated.load(Ordering::Relaxed),
            bytes_migrated: self.bytes_migrated.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
        }
    }
}

impl ProgressSnapshot {
    /// Status line text for the given source OSTs
    pub fn render(&self, sources: &TargetSet) -> String {
        let mut line = format!(
            "Searching OSTs: {}, migrated files: {}, bytes: {}",
            sources,
            self.files_migrated,
            DecimalBytes(self.bytes_migrated)
        );
        if self.files_failed > 0 || self.files_skipped > 0 {
            line.push_str(&format!(
                ", failed: {}, skipped: {}",
                self.files_failed, self.files_skipped
            ));
        }
        line
    }
}

/// Periodic status line on stderr
pub struct ProgressReporter {
    sources: TargetSet,
    period: Duration,
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a reporter for a fixed set of source OSTs
    pub fn new(sources: TargetSet, period: Duration) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self {
            sources,
            period,
            bar,
        }
    }

    /// Reporter that draws nothing (tests, non-interactive runs)
    pub fn hidden(sources: TargetSet, period: Duration) -> Self {
        Self {
            sources,
            period,
            bar: ProgressBar::hidden(),
        }
    }

    /// Redraw every period until cancelled, then leave the final line
    pub async fn run(&self, counters: &ProgressCounters, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.bar.set_message(counters.snapshot().render(&self.sources));
                    self.bar.tick();
                }
            }
        }

        self.bar
            .finish_with_message(counters.snapshot().render(&self.sources));
    }
}
