//! Runs one streamlet against taps until it goes quiet.

use super::commit_log::{CommitRecord, FlakyCommitLog, RecordingCommitLog};
use super::taps::{InletBinding, OutletBinding};
use crate::cancellation::CancellationToken;
use crate::commit::CommitLog;
use crate::config::StreamletSettings;
use crate::context::StreamletContext;
use crate::core::PartitionId;
use crate::errors::{Result, ShapeMismatchError, StreamletError};
use crate::log::InMemoryLog;
use crate::observability::SpanTimer;
use crate::shape::{PortSpec, Shape};
use crate::stages::Streamlet;
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What a harness run observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// The streamlet's consumer group.
    pub streamlet: String,
    /// Every commit call, in order.
    pub commits: Vec<CommitRecord>,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// How long the run took.
    pub duration: Duration,
    /// Keys held by the run's state store when the logic finished.
    pub state_keys: usize,
}

impl RunResult {
    /// Positions successfully committed on `partition`, in order.
    #[must_use]
    pub fn committed_positions(&self, partition: &PartitionId) -> Vec<u64> {
        self.commits
            .iter()
            .filter(|c| c.succeeded && &c.partition == partition)
            .map(|c| c.position)
            .collect()
    }
}

/// Resets and stops a run's state store when the run ends, however it ends.
struct ScopedStore(Arc<StateStore>);

impl Drop for ScopedStore {
    fn drop(&mut self) {
        self.0.reset();
        self.0.stop();
    }
}

/// Drives a streamlet's logic against in-memory taps.
///
/// Every [`run`](Self::run) gets a fresh [`StateStore`], released when the
/// run returns, so aggregates never carry over from one run to the next.
/// Commits land on the inlet taps' topics under the harness name, so a
/// second run resumes after the last committed position.
#[derive(Debug)]
pub struct TestHarness {
    name: String,
    settings: StreamletSettings,
    commit_failures: usize,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "harness".to_string(),
            settings: StreamletSettings::default(),
            commit_failures: 0,
        }
    }

    /// Sets the consumer group the streamlet runs as.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the streamlet settings.
    #[must_use]
    pub fn with_settings(mut self, settings: StreamletSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Fails the first `failures` commit calls of every run.
    #[must_use]
    pub fn with_commit_failures(mut self, failures: usize) -> Self {
        self.commit_failures = failures;
        self
    }

    /// Gets the consumer group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The position this harness last committed on `tap`'s `partition`.
    #[must_use]
    pub fn committed(&self, tap: &dyn InletBinding, partition: u32) -> Option<u64> {
        tap.topic().committed(&self.name, partition)
    }

    /// Runs `streamlet` until its graph completes or `timeout` passes.
    ///
    /// Every inlet needs a tap. Outlets without a tap write to a scratch
    /// topic that is discarded after the run.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] if a tap does not match the shape,
    /// [`StreamletError::Timeout`] if the logic has not finished in time,
    /// or the error the logic failed with.
    pub async fn run(
        &self,
        streamlet: &dyn Streamlet,
        inlets: &[&dyn InletBinding],
        outlets: &[&dyn OutletBinding],
        timeout: Duration,
    ) -> Result<RunResult> {
        let shape = streamlet.shape()?;
        check_taps(&shape, inlets, outlets)?;

        let log = InMemoryLog::new();
        let base: Arc<dyn CommitLog> = Arc::new(log.commit_log(self.name.clone()));
        let inner: Arc<dyn CommitLog> = if self.commit_failures > 0 {
            Arc::new(FlakyCommitLog::new(base, self.commit_failures))
        } else {
            base
        };
        let recording = Arc::new(RecordingCommitLog::new(inner));

        let store = ScopedStore(Arc::new(StateStore::new()));
        let cancel = Arc::new(CancellationToken::new());
        let mut ctx = StreamletContext::new(
            self.name.clone(),
            shape.clone(),
            self.settings.clone(),
            Arc::clone(&recording) as Arc<dyn CommitLog>,
            Arc::clone(&cancel),
            Arc::clone(&store.0),
        );
        for tap in inlets {
            let topic = tap.topic();
            log.register(Arc::clone(&topic));
            ctx.bind_inlet(tap.port().name.clone(), topic, Some(tap.reset()), true);
        }
        for spec in shape.outlets() {
            let topic = match outlets.iter().find(|t| t.port().name == spec.name) {
                Some(tap) => tap.topic(),
                None => spec
                    .create_topic(&format!("scratch.{}", spec.name))
                    .ok_or_else(|| StreamletError::Internal(format!("outlet '{}' has no topic factory", spec.name)))?,
            };
            log.register(Arc::clone(&topic));
            ctx.bind_outlet(spec.name.clone(), topic);
        }

        let logic = streamlet.create_logic();
        logic.validate(&self.name, &shape)?;
        let kind = logic.kind();
        let graph = logic.build(&mut ctx)?;
        debug!(streamlet = %self.name, kind = %kind, "Harness graph built");

        let started_at = Utc::now();
        let timer = SpanTimer::start(format!("harness.{}", self.name));
        let outcome = tokio::time::timeout(timeout, graph.run()).await;
        cancel.cancel("harness run finished");
        let duration = timer.finish();

        outcome.map_err(|_| StreamletError::Timeout {
            streamlet: self.name.clone(),
            timeout,
        })??;

        let state_keys = store.0.len();
        drop(store);
        let commits = recording.calls();
        info!(
            streamlet = %self.name,
            commits = commits.len(),
            duration_ms = duration.as_secs_f64() * 1000.0,
            "Harness run completed"
        );
        Ok(RunResult {
            streamlet: self.name.clone(),
            commits,
            started_at,
            duration,
            state_keys,
        })
    }
}

fn check_port(owner: &str, declared: Option<&PortSpec>, tap: &PortSpec) -> Result<(), ShapeMismatchError> {
    let declared = declared.ok_or_else(|| ShapeMismatchError::unknown_port(owner, &tap.name))?;
    if declared.type_id == tap.type_id {
        Ok(())
    } else {
        Err(ShapeMismatchError::type_mismatch(&tap.name, declared.type_name, tap.type_name))
    }
}

fn check_taps(shape: &Shape, inlets: &[&dyn InletBinding], outlets: &[&dyn OutletBinding]) -> Result<(), ShapeMismatchError> {
    for tap in inlets {
        check_port("tap", shape.inlet(&tap.port().name), tap.port())?;
    }
    for tap in outlets {
        check_port("tap", shape.outlet(&tap.port().name), tap.port())?;
    }
    for spec in shape.inlets() {
        let bound = inlets.iter().filter(|t| t.port().name == spec.name).count();
        match bound {
            0 => return Err(ShapeMismatchError::unconnected_inlet(&spec.name)),
            1 => {}
            _ => return Err(ShapeMismatchError::inlet_already_connected(&spec.name)),
        }
    }
    Ok(())
}
