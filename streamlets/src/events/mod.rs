//! Lifecycle event sinks.
//!
//! The runner reports `pipeline.started`, `pipeline.stopped`,
//! `pipeline.restarted` and `streamlet.failed` through an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LifecycleEvent, LoggingEventSink, NoOpEventSink};

/// Emitted after every streamlet of a pipeline has been spawned.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Emitted after a stop has drained or abandoned every streamlet.
pub const PIPELINE_STOPPED: &str = "pipeline.stopped";
/// Emitted after a restart brings the pipeline back up.
pub const PIPELINE_RESTARTED: &str = "pipeline.restarted";
/// Emitted when a streamlet's graph ends with an error.
pub const STREAMLET_FAILED: &str = "streamlet.failed";
