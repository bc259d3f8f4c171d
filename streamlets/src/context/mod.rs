//! Execution context for streamlet logic.

mod streamlet_context;

pub use streamlet_context::StreamletContext;
