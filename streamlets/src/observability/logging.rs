//! `tracing` subscriber setup.

use crate::errors::{Result, StreamletError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Output format for [`init_logging`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Returns [`StreamletError::Config`] if a global subscriber is already set.
pub fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| StreamletError::Config(format!("logging already initialised: {e}")))
}

/// The span a streamlet's graph runs under.
#[must_use]
pub fn streamlet_span(pipeline: &str, streamlet: &str, run_id: &str) -> Span {
    tracing::info_span!("streamlet", pipeline = %pipeline, streamlet = %streamlet, run_id = %run_id)
}

/// Measures how long a named section took.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts timing.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Elapsed time so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// The section name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops timing and returns the elapsed time.
    #[must_use]
    pub fn finish(self) -> Duration {
        self.elapsed()
    }
}
