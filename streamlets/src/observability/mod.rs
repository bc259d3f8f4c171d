//! Logging setup and span helpers.

mod logging;

pub use logging::{init_logging, streamlet_span, LogFormat, SpanTimer};
