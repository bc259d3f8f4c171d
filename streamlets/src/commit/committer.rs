//! Batching committer.

use super::retry::with_retry;
use crate::config::CommitterSettings;
use crate::core::{Offset, PartitionId};
use crate::errors::CommitFailureError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// The external log's commit endpoint.
///
/// Committing a position means "everything up to and including this
/// position has been processed". Implementations must be idempotent:
/// committing the same position twice is the same as committing it once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Persists `position` as the committed high-water mark of `partition`.
    async fn commit(&self, partition: &PartitionId, position: u64) -> Result<(), CommitFailureError>;
}

/// Lifecycle of a committer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitterState {
    /// Nothing pending.
    Idle,
    /// Offsets recorded but not yet flushed.
    Accumulating,
    /// A flush is in progress.
    Flushing,
}

impl fmt::Display for CommitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Accumulating => write!(f, "accumulating"),
            Self::Flushing => write!(f, "flushing"),
        }
    }
}

#[derive(Debug, Clone)]
struct PartitionProgress {
    first_observed: u64,
    committed: Option<u64>,
    pending: Option<u64>,
}

impl PartitionProgress {
    /// Log positions acknowledged by the pending mark since the last commit.
    fn covered(&self) -> u64 {
        match (self.pending, self.committed) {
            (None, _) => 0,
            (Some(hw), Some(committed)) => hw.saturating_sub(committed),
            (Some(hw), None) => hw.saturating_sub(self.first_observed) + 1,
        }
    }

    fn high_water(&self) -> Option<u64> {
        match (self.pending, self.committed) {
            (Some(p), Some(c)) => Some(p.max(c)),
            (p, c) => p.or(c),
        }
    }
}

/// Pending per-partition high-water marks of one committer.
#[derive(Debug, Default)]
pub struct CommitBatch {
    partitions: BTreeMap<PartitionId, PartitionProgress>,
    oldest_pending: Option<Instant>,
    flushing: bool,
}

impl CommitBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the pending mark of the offset's partition.
    ///
    /// Returns false when the offset is behind the partition's high-water
    /// mark, in which case it is ignored. An offset equal to the mark is
    /// accepted and changes nothing.
    pub fn record(&mut self, offset: &Offset) -> bool {
        let position = offset.position();
        let progress = self
            .partitions
            .entry(offset.partition().clone())
            .or_insert_with(|| PartitionProgress {
                first_observed: position,
                committed: None,
                pending: None,
            });

        if let Some(hw) = progress.high_water() {
            if position < hw {
                return false;
            }
            if position == hw {
                return true;
            }
        }

        progress.pending = Some(position);
        if self.oldest_pending.is_none() {
            self.oldest_pending = Some(Instant::now());
        }
        true
    }

    /// Log positions covered by all pending marks.
    #[must_use]
    pub fn pending_count(&self) -> u64 {
        self.partitions.values().map(PartitionProgress::covered).sum()
    }

    /// Returns true if any partition has an unflushed mark.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.partitions.values().any(|p| p.pending.is_some())
    }

    /// When the oldest pending mark was first recorded.
    #[must_use]
    pub fn oldest_pending(&self) -> Option<Instant> {
        self.oldest_pending
    }

    /// The last committed position of a partition, if any.
    #[must_use]
    pub fn committed(&self, partition: &PartitionId) -> Option<u64> {
        self.partitions.get(partition).and_then(|p| p.committed)
    }

    /// The marks a flush should write, in partition order.
    #[must_use]
    pub fn pending_marks(&self) -> Vec<(PartitionId, u64)> {
        self.partitions
            .iter()
            .filter_map(|(partition, progress)| progress.pending.map(|hw| (partition.clone(), hw)))
            .collect()
    }

    fn mark_committed(&mut self, partition: &PartitionId, position: u64) {
        if let Some(progress) = self.partitions.get_mut(partition) {
            progress.committed = Some(progress.committed.map_or(position, |c| c.max(position)));
            if progress.pending.is_some_and(|hw| hw <= position) {
                progress.pending = None;
            }
        }
        self.oldest_pending = if self.has_pending() {
            Some(self.oldest_pending.unwrap_or_else(Instant::now))
        } else {
            None
        };
    }
}

/// Counters describing a committer's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterStats {
    /// Offsets passed to `record`.
    pub records: usize,
    /// Offsets ignored because they were behind the high-water mark.
    pub ignored: usize,
    /// Flushes that wrote at least one mark.
    pub flushes: usize,
    /// Successful commit calls.
    pub commits: usize,
    /// Commit attempts that failed and were retried.
    pub retries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    records: AtomicUsize,
    ignored: AtomicUsize,
    flushes: AtomicUsize,
    commits: AtomicUsize,
    retries: AtomicUsize,
}

/// Accumulates processed offsets and commits them in batches.
///
/// A flush happens when the pending marks cover `max_batch_size` log
/// positions, when the oldest pending mark is older than
/// `max_batch_interval`, or when [`Committer::flush`] is called.
pub struct Committer {
    name: String,
    settings: CommitterSettings,
    log: Arc<dyn CommitLog>,
    batch: Mutex<CommitBatch>,
    flush_lock: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl fmt::Debug for Committer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Committer")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Committer {
    /// Creates a committer writing to `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, settings: CommitterSettings, log: Arc<dyn CommitLog>) -> Self {
        Self {
            name: name.into(),
            settings,
            log,
            batch: Mutex::new(CommitBatch::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// Gets the committer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the batching settings.
    #[must_use]
    pub fn settings(&self) -> &CommitterSettings {
        &self.settings
    }

    /// Gets the current state.
    #[must_use]
    pub fn state(&self) -> CommitterState {
        let batch = self.batch.lock();
        if batch.flushing {
            CommitterState::Flushing
        } else if batch.has_pending() {
            CommitterState::Accumulating
        } else {
            CommitterState::Idle
        }
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> CommitterStats {
        CommitterStats {
            records: self.counters.records.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// The last position this committer wrote for a partition.
    #[must_use]
    pub fn committed(&self, partition: &PartitionId) -> Option<u64> {
        self.batch.lock().committed(partition)
    }

    /// Log positions covered by pending marks.
    #[must_use]
    pub fn pending_count(&self) -> u64 {
        self.batch.lock().pending_count()
    }

    /// Records the offset of a record whose effect has completed, flushing
    /// if the size threshold is reached.
    ///
    /// # Errors
    ///
    /// Returns [`CommitFailureError`] if a triggered flush exhausts its retries.
    pub async fn record(&self, offset: Offset) -> Result<(), CommitFailureError> {
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        let accepted = self.batch.lock().record(&offset);
        if !accepted {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            warn!(
                committer = %self.name,
                offset = %offset,
                "Ignoring offset behind the partition high-water mark"
            );
            return Ok(());
        }
        self.flush_if_due().await
    }

    /// Flushes if either threshold has been crossed.
    ///
    /// # Errors
    ///
    /// Returns [`CommitFailureError`] if the flush exhausts its retries.
    pub async fn flush_if_due(&self) -> Result<(), CommitFailureError> {
        if self.is_due() {
            self.flush().await
        } else {
            Ok(())
        }
    }

    /// Returns true if a flush is due now.
    #[must_use]
    pub fn is_due(&self) -> bool {
        let batch = self.batch.lock();
        if !batch.has_pending() {
            return false;
        }
        let by_size = batch.pending_count() >= self.settings.max_batch_size as u64;
        let by_time = batch
            .oldest_pending()
            .is_some_and(|t| t.elapsed() >= self.settings.max_batch_interval());
        by_size || by_time
    }

    /// When the interval trigger will fire, if anything is pending.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batch
            .lock()
            .oldest_pending()
            .map(|t| t + self.settings.max_batch_interval())
    }

    /// Commits every pending high-water mark.
    ///
    /// Each partition's commit is retried per the retry policy. Marks that
    /// were written stay written even if a later partition fails.
    ///
    /// # Errors
    ///
    /// Returns [`CommitFailureError`] for the first partition whose retries
    /// run out; its mark stays pending.
    pub async fn flush(&self) -> Result<(), CommitFailureError> {
        let _guard = self.flush_lock.lock().await;

        let marks = {
            let mut batch = self.batch.lock();
            let marks = batch.pending_marks();
            if !marks.is_empty() {
                batch.flushing = true;
            }
            marks
        };
        if marks.is_empty() {
            return Ok(());
        }

        let result = self.write_marks(&marks).await;
        self.batch.lock().flushing = false;
        if result.is_ok() {
            self.counters.flushes.fetch_add(1, Ordering::Relaxed);
            debug!(committer = %self.name, partitions = marks.len(), "Flushed commit batch");
        }
        result
    }

    async fn write_marks(&self, marks: &[(PartitionId, u64)]) -> Result<(), CommitFailureError> {
        for (partition, position) in marks {
            let attempts = AtomicUsize::new(0);
            let key = partition.to_string();
            let outcome = with_retry(&self.settings.retry, &key, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.log.commit(partition, *position)
            })
            .await;

            let made = attempts.load(Ordering::Relaxed);
            self.counters
                .retries
                .fetch_add(made.saturating_sub(1), Ordering::Relaxed);

            match outcome {
                Ok(()) => {
                    self.counters.commits.fetch_add(1, Ordering::Relaxed);
                    self.batch.lock().mark_committed(partition, *position);
                }
                Err(exhausted) => {
                    error!(
                        committer = %self.name,
                        partition = %partition,
                        position,
                        attempts = exhausted.attempts,
                        error = %exhausted.error,
                        "Commit retries exhausted"
                    );
                    return Err(CommitFailureError::new(
                        partition.clone(),
                        *position,
                        exhausted.error.reason,
                    )
                    .after_attempts(exhausted.attempts));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{JitterStrategy, RetryConfig};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use std::time::Duration;

    fn p0() -> PartitionId {
        PartitionId::new("numbers", 0)
    }

    fn offset(position: u64) -> Offset {
        Offset::new(p0(), position)
    }

    fn quick_retry(attempts: usize) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(attempts)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None)
    }

    fn settings(size: usize) -> CommitterSettings {
        CommitterSettings::new()
            .with_max_batch_size(size)
            .with_max_batch_interval(Duration::from_secs(60))
            .with_retry(quick_retry(3))
    }

    #[test]
    fn test_batch_counts_positions_not_calls() {
        let mut batch = CommitBatch::new();
        assert!(batch.record(&offset(1)));
        assert_eq!(batch.pending_count(), 1);
        assert!(batch.record(&offset(3)));
        assert_eq!(batch.pending_count(), 3);
        // duplicate from a one-to-many expansion
        assert!(batch.record(&offset(3)));
        assert_eq!(batch.pending_count(), 3);
    }

    #[test]
    fn test_batch_ignores_stale_offsets() {
        let mut batch = CommitBatch::new();
        batch.record(&offset(5));
        assert!(!batch.record(&offset(4)));
        assert_eq!(batch.pending_marks(), vec![(p0(), 5)]);
    }

    #[test]
    fn test_batch_marks_per_partition() {
        let mut batch = CommitBatch::new();
        batch.record(&offset(2));
        batch.record(&Offset::new(PartitionId::new("numbers", 1), 9));
        batch.record(&offset(4));

        let marks = batch.pending_marks();
        assert_eq!(marks.len(), 2);
        assert_eq!(marks[0], (p0(), 4));
        assert_eq!(marks[1].1, 9);
    }

    #[tokio::test]
    async fn test_size_trigger_commits_high_water_marks() {
        let mut log = MockCommitLog::new();
        let mut seq = Sequence::new();
        for position in [3_u64, 7, 9] {
            log.expect_commit()
                .with(eq(p0()), eq(position))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let committer = Committer::new("odd-filter", settings(3), Arc::new(log));
        for position in (1..=10).filter(|p| p % 2 == 1) {
            committer.record(offset(position)).await.unwrap();
        }
        committer.flush().await.unwrap();

        assert_eq!(committer.committed(&p0()), Some(9));
        assert_eq!(committer.state(), CommitterState::Idle);
        let stats = committer.stats();
        assert_eq!(stats.records, 5);
        assert_eq!(stats.commits, 3);
    }

    #[tokio::test]
    async fn test_interval_trigger() {
        let mut log = MockCommitLog::new();
        log.expect_commit()
            .with(eq(p0()), eq(1))
            .times(1)
            .returning(|_, _| Ok(()));

        let settings = settings(100).with_max_batch_interval(Duration::from_millis(20));
        let committer = Committer::new("slow", settings, Arc::new(log));
        committer.record(offset(1)).await.unwrap();
        assert_eq!(committer.state(), CommitterState::Accumulating);
        assert!(committer.next_deadline().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(committer.is_due());
        committer.flush_if_due().await.unwrap();
        assert_eq!(committer.state(), CommitterState::Idle);
        assert!(committer.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_flush_with_nothing_pending_is_noop() {
        let log = MockCommitLog::new();
        let committer = Committer::new("empty", settings(3), Arc::new(log));
        committer.flush().await.unwrap();
        assert_eq!(committer.stats().flushes, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_converges() {
        let mut log = MockCommitLog::new();
        let mut calls = 0;
        log.expect_commit().times(2).returning(move |partition, position| {
            calls += 1;
            if calls == 1 {
                Err(CommitFailureError::new(partition.clone(), position, "broker unavailable"))
            } else {
                Ok(())
            }
        });

        let committer = Committer::new("flaky", settings(1), Arc::new(log));
        committer.record(offset(1)).await.unwrap();

        assert_eq!(committer.committed(&p0()), Some(1));
        assert_eq!(committer.stats().retries, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_failure() {
        let mut log = MockCommitLog::new();
        log.expect_commit()
            .times(3)
            .returning(|partition, position| {
                Err(CommitFailureError::new(partition.clone(), position, "down"))
            });

        let committer = Committer::new("broken", settings(1), Arc::new(log));
        let err = committer.record(offset(4)).await.unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.position, 4);
        assert_eq!(err.reason, "down");
        assert_eq!(committer.state(), CommitterState::Accumulating);
        assert_eq!(committer.committed(&p0()), None);
    }

    #[tokio::test]
    async fn test_recommit_after_flush_counts_from_committed() {
        let mut log = MockCommitLog::new();
        log.expect_commit().returning(|_, _| Ok(()));

        let committer = Committer::new("steady", settings(3), Arc::new(log));
        committer.record(offset(3)).await.unwrap();
        // first observed is 3, so one position is covered
        assert_eq!(committer.pending_count(), 1);
        committer.flush().await.unwrap();

        committer.record(offset(5)).await.unwrap();
        assert_eq!(committer.pending_count(), 2);
        committer.record(offset(2)).await.unwrap();
        assert_eq!(committer.stats().ignored, 1);
    }
}
