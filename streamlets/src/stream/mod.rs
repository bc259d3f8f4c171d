//! Stream building blocks.
//!
//! This module contains:
//! - [`ContextStream`], whose values carry the offset they are committed by
//! - [`PlainStream`], for at-most-once flows without offsets
//! - Sinks, effects and the [`RunnableGraph`] that drives them
//! - Keyed micro-batch aggregation

mod aggregate;
mod context;
mod graph;
mod plain;
mod sink;
pub(crate) mod source;

pub use aggregate::AggregateRow;
pub use context::ContextStream;
pub use graph::RunnableGraph;
pub use plain::PlainStream;
pub use sink::{
    BatchWriter, CommittableSink, Discard, FnEffect, OutletWriter, PlainSink, SinkEffect,
    SplitWriter,
};
