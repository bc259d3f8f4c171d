//! Stage kind and delivery mode enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of logic a streamlet runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces records to outlets; has no inlets.
    Source,
    /// Reads one inlet, writes one outlet.
    Transform,
    /// Consumes inlets; has no outlets.
    Sink,
    /// Arbitrary wiring over the declared ports.
    Graph,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Transform => write!(f, "transform"),
            Self::Sink => write!(f, "sink"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// How records travel between a source and its sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// No offsets; progress is lost on restart (at-most-once).
    Plain,
    /// Every value carries an offset committed after its effect (at-least-once).
    #[default]
    Context,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Context => write!(f, "context"),
        }
    }
}
