//! Offset commit protocol.
//!
//! A [`Committer`] collects the offsets of records whose sink effect has
//! completed and flushes per-partition high-water marks to a [`CommitLog`]
//! once a size or time threshold is crossed.

mod committer;
mod retry;

pub use committer::{CommitBatch, CommitLog, Committer, CommitterState, CommitterStats};
pub use retry::{with_retry, Backoff, BackoffStrategy, Exhausted, JitterStrategy, RetryConfig};

#[cfg(test)]
pub use committer::MockCommitLog;
