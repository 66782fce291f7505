//! OST utilization tracking
//!
//! Keeps a ranked view of every OST by free space:
//! - Parses `lfs df -l` reports, skipping lines that are not OST rows
//! - Publishes each refresh as a new immutable snapshot
//! - Answers "fullest N" (migration sources) and "emptiest N" (destinations)

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::client::{ClientError, FilesystemClient, TargetSet};

/// One OST and its free space as of the last refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub index: u32,
    pub free_bytes: i64,
}

impl Target {
    /// Parse one `lfs df -l` row, e.g.
    ///
    /// ```text
    /// lustre-OST0002_UUID  7811748  1251024  6126888  17% /mnt/lustre[OST:2]
    /// ```
    ///
    /// The available column is in KiB. Header, MDT and summary rows return
    /// `None`, as does any row whose available column or OST index does not
    /// parse.
    pub fn parse_df_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return None;
        }

        let available_kib: i64 = fields[3].parse().ok()?;

        let mount = fields[5];
        let start = mount.find("OST:")? + "OST:".len();
        let end = start + mount[start..].find(']')?;
        let index: u32 = mount[start..end].parse().ok()?;

        Some(Self {
            index,
            free_bytes: available_kib.saturating_mul(1024),
        })
    }
}

/// Immutable ranking of OSTs, most free space first
#[derive(Debug, Clone, Default)]
pub struct UtilizationSnapshot {
    targets: Vec<Target>,
}

impl UtilizationSnapshot {
    /// Rank targets by free space, descending. Ties keep input order.
    pub fn new(mut targets: Vec<Target>) -> Self {
        targets.sort_by(|a, b| b.free_bytes.cmp(&a.free_bytes));
        Self { targets }
    }

    /// Build a snapshot from a full `lfs df -l` report
    pub fn from_df_output(output: &str) -> Self {
        let targets = output
            .lines()
            .filter_map(|line| {
                let target = Target::parse_df_line(line);
                if target.is_none() && !line.trim().is_empty() {
                    trace!(line, "Skipping non-OST df line");
                }
                target
            })
            .collect();
        Self::new(targets)
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// The `n` OSTs with the least free space (tail of the ranking).
    ///
    /// Asking for more than [`len`](Self::len) returns every target rather
    /// than failing.
    pub fn most_utilized(&self, n: usize) -> &[Target] {
        let n = n.min(self.targets.len());
        &self.targets[self.targets.len() - n..]
    }

    /// The `n` OSTs with the most free space (head of the ranking).
    ///
    /// Truncates like [`most_utilized`](Self::most_utilized).
    pub fn least_utilized(&self, n: usize) -> &[Target] {
        let n = n.min(self.targets.len());
        &self.targets[..n]
    }
}

fn index_set(targets: &[Target]) -> TargetSet {
    targets.iter().map(|t| t.index).collect()
}

/// Owner of the current snapshot
///
/// A refresh builds a complete new snapshot and swaps the `Arc` in; readers
/// clone the `Arc` and never see a half-built ranking.
#[derive(Debug, Default)]
pub struct UtilizationTracker {
    current: RwLock<Arc<UtilizationSnapshot>>,
}

impl UtilizationTracker {
    /// Create a tracker with an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker seeded with a snapshot
    pub fn with_snapshot(snapshot: UtilizationSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<UtilizationSnapshot> {
        self.current.read().clone()
    }

    /// Replace the current snapshot
    pub fn publish(&self, snapshot: UtilizationSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    /// Query OST usage and publish a fresh ranking.
    ///
    /// Returns the number of OSTs in the new snapshot. Only a failing query
    /// is an error; unparseable rows are dropped.
    #[instrument(skip(self, client))]
    pub async fn refresh(&self, client: &dyn FilesystemClient) -> Result<usize, ClientError> {
        let output = client.query_utilization().await?;
        let snapshot = UtilizationSnapshot::from_df_output(&output);
        let count = snapshot.len();

        debug!(
            targets = count,
            emptiest = ?snapshot.least_utilized(1).first(),
            fullest = ?snapshot.most_utilized(1).first(),
            "Utilization refreshed"
        );

        self.publish(snapshot);
        Ok(count)
    }

    /// Refresh every `period` until cancelled or a query fails.
    ///
    /// The first refresh happens one `period` from now; callers seed the
    /// tracker with [`refresh`](Self::refresh) before starting the loop.
    pub async fn run_refresh_loop(
        &self,
        client: &dyn FilesystemClient,
        period: Duration,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Utilization refresh stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.refresh(client).await?;
                }
            }
        }
    }

    /// Indices of the `n` fullest OSTs; truncates when `n` exceeds the count
    pub fn most_utilized(&self, n: usize) -> TargetSet {
        index_set(self.snapshot().most_utilized(n))
    }

    /// Indices of the `n` emptiest OSTs; truncates when `n` exceeds the count
    pub fn least_utilized(&self, n: usize) -> TargetSet {
        index_set(self.snapshot().least_utilized(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DF_OUTPUT: &str = "\
UUID                   1K-blocks        Used   Available Use% Mounted on
lustre-MDT0000_UUID      2210560       49664     1956096   3% /mnt/lustre[MDT:0]
lustre-OST0000_UUID      7811748     1251024     6126888  17% /mnt/lustre[OST:0]
lustre-OST0001_UUID      7811748     7000000      400000  95% /mnt/lustre[OST:1]
lustre-OST0002_UUID      7811748     3000000     4400000  41% /mnt/lustre[OST:2]
lustre-OST0003_UUID      7811748     3000000         bad  41% /mnt/lustre[OST:3]
lustre-OST0004_UUID      7811748     3000000     4400000  41% /mnt/lustre[OST:x]
lustre-OST0005_UUID      7811748     3000000     4400000  41% /mnt/lustre[OST:5

filesystem_summary:     23435244    11251024    10926888  51% /mnt/lustre
";

    fn targets(pairs: &[(u32, i64)]) -> Vec<Target> {
        pairs
            .iter()
            .map(|&(index, free_bytes)| Target { index, free_bytes })
            .collect()
    }

    #[test]
    fn test_parse_df_line() {
        let target =
            Target::parse_df_line("lustre-OST000a_UUID 100 20 80 20% /mnt/lustre[OST:10]")
                .unwrap();
        assert_eq!(target.index, 10);
        assert_eq!(target.free_bytes, 80 * 1024);
    }

    #[test]
    fn test_parse_df_line_rejects_non_ost_rows() {
        assert!(Target::parse_df_line("").is_none());
        assert!(Target::parse_df_line("UUID 1K-blocks Used Available Use% Mounted on").is_none());
        assert!(Target::parse_df_line("x 1 2 3 4% /mnt/lustre[MDT:0]").is_none());
        assert!(Target::parse_df_line("x 1 2 3 4% /mnt/lustre[OST:]").is_none());
    }

    #[test]
    fn test_snapshot_from_df_output_skips_malformed() {
        let snapshot = UtilizationSnapshot::from_df_output(DF_OUTPUT);
        let indices: Vec<u32> = snapshot.targets().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![0, 2, 1]);
    }

    #[test]
    fn test_snapshot_ties_keep_input_order() {
        let snapshot = UtilizationSnapshot::new(targets(&[(4, 10), (1, 50), (3, 10), (2, 10)]));
        let indices: Vec<u32> = snapshot.targets().iter().map(|t| t.index).collect();
        assert_eq!(indices, vec![1, 4, 3, 2]);
    }

    #[test]
    fn test_most_and_least_utilized() {
        let snapshot = UtilizationSnapshot::new(targets(&[(0, 100), (1, 50), (2, 10)]));
        assert_eq!(snapshot.most_utilized(1), &targets(&[(2, 10)])[..]);
        assert_eq!(snapshot.least_utilized(1), &targets(&[(0, 100)])[..]);
        assert_eq!(snapshot.least_utilized(2), &targets(&[(0, 100), (1, 50)])[..]);
    }

    #[test]
    fn test_selection_truncates() {
        let snapshot = UtilizationSnapshot::new(targets(&[(0, 100), (1, 50)]));
        assert_eq!(snapshot.most_utilized(5).len(), 2);
        assert_eq!(snapshot.least_utilized(50).len(), 2);
        assert!(UtilizationSnapshot::default().least_utilized(1).is_empty());
    }

    #[test]
    fn test_tracker_publish_replaces_snapshot() {
        let tracker = UtilizationTracker::with_snapshot(UtilizationSnapshot::new(targets(&[
            (0, 100),
            (1, 50),
        ])));
        let before = tracker.snapshot();

        tracker.publish(UtilizationSnapshot::new(targets(&[(0, 10), (1, 500)])));

        assert_eq!(before.least_utilized(1)[0].index, 0);
        assert_eq!(tracker.least_utilized(1), TargetSet::new(vec![1]));
        assert_eq!(tracker.most_utilized(1), TargetSet::new(vec![0]));
    }

    fn arb_targets() -> impl Strategy<Value = Vec<Target>> {
        prop::collection::vec((0u32..512, -1_000i64..1_000_000), 0..64)
            .prop_map(|pairs| {
                pairs
                    .into_iter()
                    .map(|(index, free_bytes)| Target { index, free_bytes })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn snapshot_is_sorted_descending(input in arb_targets()) {
            let snapshot = UtilizationSnapshot::new(input.clone());
            prop_assert_eq!(snapshot.len(), input.len());
            for pair in snapshot.targets().windows(2) {
                prop_assert!(pair[0].free_bytes >= pair[1].free_bytes);
            }
        }

        #[test]
        fn most_and_least_partition_the_snapshot(input in arb_targets(), cut in 0usize..80) {
            let snapshot = UtilizationSnapshot::new(input);
            let total = snapshot.len();
            let n = cut.min(total);

            let most = snapshot.most_utilized(n);
            let least = snapshot.least_utilized(total - n);
            prop_assert_eq!(most.len() + least.len(), total);

            let mut joined = least.to_vec();
            joined.extend_from_slice(most);
            prop_assert_eq!(joined.as_slice(), snapshot.targets());
        }

        #[test]
        fn df_parsing_ignores_noise(input in arb_targets(), noise in "[a-z ]{0,40}") {
            let mut report = String::from("UUID 1K-blocks Used Available Use% Mounted on\n");
            for t in &input {
                report.push_str(&format!(
                    "fs-OST_UUID 1 1 {} 1% /mnt/fs[OST:{}]\n{}\n",
                    t.free_bytes, t.index, noise
                ));
            }
            let snapshot = UtilizationSnapshot::from_df_output(&report);
            let expected = UtilizationSnapshot::new(
                input
                    .iter()
                    .map(|t| Target { index: t.index, free_bytes: t.free_bytes * 1024 })
                    .collect(),
            );
            prop_assert_eq!(snapshot.targets(), expected.targets());
        }
    }
}
