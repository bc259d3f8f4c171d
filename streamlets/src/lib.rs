//! # Streamlets
//!
//! A streaming runtime in which independently deployable stages
//! ("streamlets") exchange records through named, typed ports.
//!
//! - **Offset propagation**: values read in context mode carry their offset
//!   through ordinary `map`/`filter`/`map_concat` transformations
//! - **At-least-once commits**: a committer batches offsets and commits them
//!   only after the sink's effect has completed
//! - **Lifecycle**: a pipeline runner starts, stops, restarts and supervises
//!   streamlets over an in-memory partitioned log
//! - **Deterministic tests**: inlet and outlet taps run a streamlet's logic
//!   against bounded data without a broker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamlets::prelude::*;
//!
//! #[derive(Debug)]
//! struct OddFilter {
//!     input: Inlet<u64>,
//!     output: Outlet<u64>,
//! }
//!
//! impl Streamlet for OddFilter {
//!     fn shape(&self) -> Result<Shape, ShapeMismatchError> {
//!         Shape::builder().inlet(&self.input).outlet(&self.output).build()
//!     }
//!
//!     fn create_logic(&self) -> StreamletLogic {
//!         StreamletLogic::process(&self.input, &self.output, |v: u64| (v % 2 == 1).then_some(v))
//!     }
//! }
//!
//! let filter = OddFilter { input: Inlet::new("in"), output: Outlet::new("out") };
//! let input = InletTap::new(&filter.input);
//! input.add_data(1..=10);
//! let output = OutletTap::new(&filter.output);
//! TestHarness::new().run(&filter, &[&input], &[&output], Duration::from_secs(1)).await?;
//! assert_eq!(output.as_collection(), vec![1, 3, 5, 7, 9]);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod commit;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod log;
pub mod observability;
pub mod partition;
pub mod runner;
pub mod shape;
pub mod stages;
pub mod state;
pub mod stream;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::commit::{CommitLog, Committer, RetryConfig};
    pub use crate::config::{CommitterSettings, OutputMode, ResetPosition, StreamletSettings};
    pub use crate::context::StreamletContext;
    pub use crate::core::{Envelope, Offset, OffsetGroup, PartitionId, Record, StageKind};
    pub use crate::errors::{
        CommitFailureError, ContractErrorInfo, MalformedRecord, PipelineValidationError,
        ShapeMismatchError, StreamletError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::log::{InMemoryLog, Topic};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::partition::PartitionKey;
    pub use crate::runner::{PipelineBuilder, PipelineRunner, RunnerState, StopReport};
    pub use crate::shape::{Inlet, Outlet, Shape};
    pub use crate::stages::{Streamlet, StreamletLogic};
    pub use crate::state::StateStore;
    pub use crate::stream::{AggregateRow, ContextStream, PlainStream, RunnableGraph};
    pub use crate::testing::{InletTap, OutletTap, RunResult, TestHarness};
    pub use std::time::Duration;
}
