//! Deterministic test harness.
//!
//! Inlet taps replay seeded data through the production topic source,
//! outlet taps capture what a streamlet writes, and [`TestHarness`] runs
//! the streamlet's logic until its bounded inputs are exhausted.

mod commit_log;
mod harness;
mod taps;

#[cfg(test)]
mod harness_tests;

pub use commit_log::{CommitRecord, FlakyCommitLog, RecordingCommitLog};
pub use harness::{RunResult, TestHarness};
pub use taps::{InletBinding, InletTap, OutletBinding, OutletTap};
