//! Starting, stopping and supervising a wired pipeline.

use super::builder::outlet_topic_name;
use crate::cancellation::CancellationToken;
use crate::config::StreamletSettings;
use crate::context::StreamletContext;
use crate::core::{PartitionId, Record};
use crate::errors::{Result, StreamletError};
use crate::events::{
    EventSink, PIPELINE_RESTARTED, PIPELINE_STARTED, PIPELINE_STOPPED, STREAMLET_FAILED,
};
use crate::log::{InMemoryLog, Topic};
use crate::observability::streamlet_span;
use crate::shape::Shape;
use crate::stages::Streamlet;
use crate::state::StateStore;
use futures::future::select_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Lifecycle state of a [`PipelineRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// Built but never started.
    Created,
    /// Every streamlet has been spawned.
    Running,
    /// A stop is draining streamlets.
    Stopping,
    /// Stopped, or every streamlet completed.
    Stopped,
    /// A streamlet failed and no restart was attempted.
    Failed,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// How each streamlet ended during a stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// Streamlets that drained and flushed.
    pub completed: Vec<String>,
    /// Streamlets that ended with an error, with the error text.
    pub failed: Vec<(String, String)>,
    /// Streamlets still running at the drain deadline, then aborted.
    pub abandoned: Vec<String>,
}

impl StopReport {
    /// Returns true if every streamlet drained cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }
}

/// A validated streamlet with its resolved inlet topics.
pub(crate) struct StreamletEntry {
    pub(crate) name: String,
    pub(crate) streamlet: Arc<dyn Streamlet>,
    pub(crate) shape: Shape,
    pub(crate) settings: StreamletSettings,
    /// Inlet name to upstream topic name.
    pub(crate) inputs: HashMap<String, String>,
}

struct StreamletTask {
    name: String,
    handle: JoinHandle<Result<()>>,
}

struct Running {
    cancel: Arc<CancellationToken>,
    tasks: Vec<StreamletTask>,
    stores: Vec<Arc<StateStore>>,
}

/// Runs every streamlet of a pipeline as its own task over a shared
/// [`InMemoryLog`].
///
/// Topics and committed positions live in the log and survive restarts;
/// logic, committers and state stores are created afresh on every start.
pub struct PipelineRunner {
    name: String,
    run_id: Uuid,
    entries: Vec<StreamletEntry>,
    log: InMemoryLog,
    event_sink: Arc<dyn EventSink>,
    state: RunnerState,
    running: Option<Running>,
    restarts: usize,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("streamlets", &self.streamlet_names())
            .field("restarts", &self.restarts)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    pub(crate) fn new(
        name: String,
        entries: Vec<StreamletEntry>,
        log: InMemoryLog,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name,
            run_id: Uuid::new_v4(),
            entries,
            log,
            event_sink,
            state: RunnerState::Created,
            running: None,
            restarts: 0,
        }
    }

    /// Gets the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the id of this runner, shared by all its starts.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Gets the current state.
    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Gets the number of restarts so far.
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Gets the streamlet names in declaration order.
    #[must_use]
    pub fn streamlet_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Gets the log shared by all streamlets.
    #[must_use]
    pub fn log(&self) -> &InMemoryLog {
        &self.log
    }

    /// Typed access to a topic: an external topic by name, or an outlet's
    /// topic as `"streamlet.outlet"`.
    ///
    /// Outlet topics exist from the first start on.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`](crate::errors::ShapeMismatchError)
    /// if the topic is missing or carries another type.
    pub fn topic<T: Record>(&self, name: &str) -> Result<Arc<Topic<T>>> {
        self.log.topic(name)
    }

    /// The position `streamlet` last committed on `partition`.
    #[must_use]
    pub fn committed(&self, streamlet: &str, partition: &PartitionId) -> Option<u64> {
        self.log.committed(streamlet, partition)
    }

    fn ensure_topics(&self) -> Result<()> {
        for entry in &self.entries {
            for outlet in entry.shape.outlets() {
                let topic_name = outlet_topic_name(&entry.name, &outlet.name);
                if self.log.topic_erased(&topic_name).is_some() {
                    continue;
                }
                let topic = outlet.create_topic(&topic_name).ok_or_else(|| {
                    StreamletError::Internal(format!("outlet '{topic_name}' has no topic factory"))
                })?;
                self.log.register(topic);
            }
        }
        Ok(())
    }

    fn build_context(
        &self,
        entry: &StreamletEntry,
        cancel: &Arc<CancellationToken>,
        store: Arc<StateStore>,
    ) -> Result<StreamletContext> {
        let mut ctx = StreamletContext::new(
            entry.name.clone(),
            entry.shape.clone(),
            entry.settings.clone(),
            Arc::new(self.log.commit_log(entry.name.clone())),
            Arc::clone(cancel),
            store,
        );
        for (inlet, topic_name) in &entry.inputs {
            let topic = self
                .log
                .topic_erased(topic_name)
                .ok_or_else(|| StreamletError::Internal(format!("topic '{topic_name}' is missing")))?;
            ctx.bind_inlet(inlet.clone(), topic, None, false);
        }
        for outlet in entry.shape.outlets() {
            let topic_name = outlet_topic_name(&entry.name, &outlet.name);
            let topic = self
                .log
                .topic_erased(&topic_name)
                .ok_or_else(|| StreamletError::Internal(format!("topic '{topic_name}' is missing")))?;
            ctx.bind_outlet(outlet.name.clone(), topic);
        }
        Ok(ctx)
    }

    /// Starts every streamlet.
    ///
    /// Logic is created and wired for all streamlets before any is spawned,
    /// so a wiring error leaves nothing running. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is already running or a streamlet's
    /// logic does not fit its shape.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(StreamletError::Internal(format!("pipeline '{}' is already running", self.name)));
        }
        self.ensure_topics()?;

        let cancel = Arc::new(CancellationToken::new());
        let mut graphs = Vec::with_capacity(self.entries.len());
        let mut stores = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let logic = entry.streamlet.create_logic();
            logic.validate(&entry.name, &entry.shape)?;
            let store = Arc::new(StateStore::new());
            let mut ctx = self.build_context(entry, &cancel, Arc::clone(&store))?;
            graphs.push((entry.name.clone(), logic.build(&mut ctx)?));
            stores.push(store);
        }

        let run_id = self.run_id.to_string();
        let tasks = graphs
            .into_iter()
            .map(|(name, graph)| {
                let span = streamlet_span(&self.name, &name, &run_id);
                let handle = tokio::spawn(graph.run().instrument(span));
                StreamletTask { name, handle }
            })
            .collect::<Vec<_>>();

        info!(pipeline = %self.name, run_id = %run_id, streamlets = tasks.len(), "Pipeline started");
        self.event_sink.try_emit(
            PIPELINE_STARTED,
            Some(serde_json::json!({
                "pipeline": self.name,
                "run_id": run_id,
                "streamlets": tasks.len(),
            })),
        );
        self.running = Some(Running {
            cancel,
            tasks,
            stores,
        });
        self.state = RunnerState::Running;
        Ok(())
    }

    fn drain_timeout(&self) -> std::time::Duration {
        self.entries
            .iter()
            .map(|e| e.settings.drain_timeout())
            .max()
            .unwrap_or_default()
    }

    /// Stops every streamlet.
    ///
    /// Sources stop admitting new records, admitted records drain and
    /// committers flush. Streamlets still running after the drain timeout
    /// are aborted and reported as abandoned. Stopping a runner that is not
    /// running returns an empty report.
    pub async fn stop(&mut self) -> StopReport {
        let Some(running) = self.running.take() else {
            return StopReport::default();
        };
        self.state = RunnerState::Stopping;
        running.cancel.cancel(format!("pipeline '{}' stopping", self.name));

        let deadline = Instant::now() + self.drain_timeout();
        let mut report = StopReport::default();
        for mut task in running.tasks {
            match timeout_at(deadline, &mut task.handle).await {
                Ok(Ok(Ok(()))) => report.completed.push(task.name),
                Ok(outcome) => {
                    let err = task_error(outcome);
                    self.report_failure(&task.name, &err).await;
                    report.failed.push((task.name, err.to_string()));
                }
                Err(_) => {
                    warn!(pipeline = %self.name, streamlet = %task.name, "Streamlet did not drain in time, aborting");
                    task.handle.abort();
                    report.abandoned.push(task.name);
                }
            }
        }
        for store in running.stores {
            store.stop();
        }

        self.state = RunnerState::Stopped;
        info!(
            pipeline = %self.name,
            completed = report.completed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Pipeline stopped"
        );
        self.event_sink
            .emit(PIPELINE_STOPPED, serde_json::to_value(&report).ok())
            .await;
        report
    }

    /// Stops and starts the pipeline. Streamlets resume from their last
    /// committed positions.
    ///
    /// # Errors
    ///
    /// Returns any error from [`start`](Self::start).
    pub async fn restart(&mut self) -> Result<StopReport> {
        let report = self.stop().await;
        self.start()?;
        self.restarts += 1;
        info!(pipeline = %self.name, restarts = self.restarts, "Pipeline restarted");
        self.event_sink
            .emit(
                PIPELINE_RESTARTED,
                Some(serde_json::json!({ "pipeline": self.name, "restarts": self.restarts })),
            )
            .await;
        Ok(report)
    }

    /// Waits for streamlets to finish, restarting the pipeline when one
    /// fails, at most `max_restarts` times.
    ///
    /// Returns once every streamlet has completed.
    ///
    /// # Errors
    ///
    /// Returns the failing streamlet's error once restarts are used up, or
    /// an error from restarting.
    pub async fn supervise(&mut self, max_restarts: usize) -> Result<()> {
        let mut budget = max_restarts;
        loop {
            let Some(running) = self.running.as_mut() else {
                return Ok(());
            };
            if running.tasks.is_empty() {
                self.finish().await;
                return Ok(());
            }

            let (outcome, index, _) = select_all(running.tasks.iter_mut().map(|t| &mut t.handle)).await;
            let task = running.tasks.swap_remove(index);
            if let Ok(Ok(())) = outcome {
                info!(pipeline = %self.name, streamlet = %task.name, "Streamlet completed");
                continue;
            }

            let err = task_error(outcome);
            self.report_failure(&task.name, &err).await;
            if budget == 0 {
                self.stop().await;
                self.state = RunnerState::Failed;
                return Err(err);
            }
            budget -= 1;
            self.restart().await?;
        }
    }

    async fn finish(&mut self) {
        if let Some(running) = self.running.take() {
            for store in running.stores {
                store.stop();
            }
        }
        self.state = RunnerState::Stopped;
        self.event_sink
            .emit(PIPELINE_STOPPED, serde_json::to_value(StopReport::default()).ok())
            .await;
    }

    async fn report_failure(&self, streamlet: &str, err: &StreamletError) {
        error!(pipeline = %self.name, streamlet = %streamlet, error = %err, "Streamlet failed");
        self.event_sink
            .emit(
                STREAMLET_FAILED,
                Some(serde_json::json!({
                    "pipeline": self.name,
                    "streamlet": streamlet,
                    "error": err.to_string(),
                    "fatal": err.is_fatal(),
                })),
            )
            .await;
    }
}

fn task_error(outcome: std::result::Result<Result<()>, JoinError>) -> StreamletError {
    match outcome {
        Ok(Err(err)) => err,
        Ok(Ok(())) => StreamletError::Internal("streamlet completed without error".to_string()),
        Err(join) => StreamletError::Internal(format!("streamlet task ended abnormally: {join}")),
    }
}

impl Drop for PipelineRunner {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel("pipeline runner dropped");
            for task in running.tasks {
                task.handle.abort();
            }
        }
    }
}
