//! Pipeline assembly and lifecycle.
//!
//! A [`PipelineBuilder`] validates how streamlets are wired; the resulting
//! [`PipelineRunner`] starts each streamlet as a task, stops them with a
//! bounded drain, and restarts them from their committed positions.

mod builder;
#[allow(clippy::module_inception)]
mod runner;


pub use builder::{outlet_topic_name, PipelineBuilder};
pub use runner::{PipelineRunner, RunnerState, StopReport};
