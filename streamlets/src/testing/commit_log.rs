//! Commit logs that observe or disturb the commit path.

use crate::commit::CommitLog;
use crate::core::PartitionId;
use crate::errors::CommitFailureError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One intercepted commit call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Partition committed.
    pub partition: PartitionId,
    /// Position committed.
    pub position: u64,
    /// Whether the wrapped log accepted the call.
    pub succeeded: bool,
}

/// Records every commit call before passing it on.
pub struct RecordingCommitLog {
    inner: Arc<dyn CommitLog>,
    calls: Mutex<Vec<CommitRecord>>,
}

impl RecordingCommitLog {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn CommitLog>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<CommitRecord> {
        self.calls.lock().clone()
    }

    /// Positions successfully committed on `partition`, in order.
    #[must_use]
    pub fn positions(&self, partition: &PartitionId) -> Vec<u64> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded && &c.partition == partition)
            .map(|c| c.position)
            .collect()
    }
}

#[async_trait]
impl CommitLog for RecordingCommitLog {
    async fn commit(&self, partition: &PartitionId, position: u64) -> Result<(), CommitFailureError> {
        let result = self.inner.commit(partition, position).await;
        self.calls.lock().push(CommitRecord {
            partition: partition.clone(),
            position,
            succeeded: result.is_ok(),
        });
        result
    }
}

/// Fails the first `failures` commit calls, then delegates.
pub struct FlakyCommitLog {
    inner: Arc<dyn CommitLog>,
    remaining: AtomicUsize,
}

impl FlakyCommitLog {
    /// Wraps `inner`, failing its first `failures` calls.
    #[must_use]
    pub fn new(inner: Arc<dyn CommitLog>, failures: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(failures),
        }
    }

    /// Failures still to inject.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommitLog for FlakyCommitLog {
    async fn commit(&self, partition: &PartitionId, position: u64) -> Result<(), CommitFailureError> {
        let injected = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(CommitFailureError::new(partition.clone(), position, "injected failure"));
        }
        self.inner.commit(partition, position).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::MockCommitLog;
    use tokio_test::{assert_err, assert_ok};

    fn accepting() -> Arc<dyn CommitLog> {
        let mut mock = MockCommitLog::new();
        mock.expect_commit().returning(|_, _| Ok(()));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_flaky_then_recorded() {
        let flaky = Arc::new(FlakyCommitLog::new(accepting(), 2));
        let recording = RecordingCommitLog::new(Arc::clone(&flaky) as Arc<dyn CommitLog>);
        let p0 = PartitionId::new("t", 0);

        assert_err!(recording.commit(&p0, 3).await);
        assert_err!(recording.commit(&p0, 3).await);
        assert_ok!(recording.commit(&p0, 3).await);
        assert_eq!(flaky.remaining(), 0);

        assert_eq!(recording.calls().len(), 3);
        assert_eq!(recording.positions(&p0), vec![3]);
        assert!(recording.positions(&PartitionId::new("t", 1)).is_empty());
    }
}
