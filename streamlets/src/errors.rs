//! Error types for the streamlets runtime.
//!
//! Construction-time problems (shape and wiring) carry a [`ContractErrorInfo`]
//! with a stable code and a fix hint. Runtime problems are split between
//! data-plane failures, which are routed as values (see [`MalformedRecord`]),
//! and control-plane failures, which stop or restart the owning streamlet.

use crate::core::PartitionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = StreamletError> = std::result::Result<T, E>;

/// The main error type for streamlet operations.
#[derive(Debug, Error)]
pub enum StreamletError {
    /// A shape or wiring conflict detected while constructing a graph.
    #[error("{0}")]
    ShapeMismatch(#[from] ShapeMismatchError),

    /// A pipeline-level validation error.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Offsets from different partitions were compared.
    #[error("{0}")]
    InvalidComparison(#[from] InvalidComparisonError),

    /// Committing offsets to the external log failed.
    #[error("{0}")]
    CommitFailure(#[from] CommitFailureError),

    /// A harness run did not reach quiescence in time.
    #[error("Streamlet '{streamlet}' did not quiesce within {timeout:?}")]
    Timeout {
        /// The streamlet under test.
        streamlet: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A record failed stage-specific validation and the stage chose to fail.
    #[error("Malformed record: {reason}")]
    MalformedRecord {
        /// Why the record was rejected.
        reason: String,
    },

    /// A user-supplied sink effect failed.
    #[error("Sink effect failed: {0}")]
    Effect(anyhow::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The state store was used after it stopped or held bad data.
    #[error("State store error: {0}")]
    StateStore(String),

    /// The streamlet was cancelled.
    #[error("Streamlet cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamletError {
    /// Returns true for failures that should stop the owning streamlet and
    /// hand control back to the runner.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedRecord { .. } | Self::Timeout { .. })
    }

    /// Wraps a user effect failure.
    #[must_use]
    pub fn effect(err: impl Into<anyhow::Error>) -> Self {
        Self::Effect(err.into())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "SHAPE-003-TYPE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON representation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        serde_json::Value::Object(map)
    }
}

/// Error raised when ports, types or stage kinds do not line up.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ShapeMismatchError {
    /// The error message.
    pub message: String,
    /// The ports involved, as `streamlet.port` or bare port names.
    pub ports: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl ShapeMismatchError {
    fn new(message: String, ports: Vec<String>, error_info: ContractErrorInfo) -> Self {
        Self {
            message,
            ports,
            error_info,
        }
    }

    /// Two ports on the same side of a shape share a name.
    #[must_use]
    pub fn duplicate_port(side: &str, name: &str) -> Self {
        Self::new(
            format!("Duplicate {side} name '{name}'"),
            vec![name.to_string()],
            ContractErrorInfo::new("SHAPE-001-DUPLICATE", format!("{side} '{name}' declared twice"))
                .with_fix_hint("Port names must be unique among inlets and among outlets."),
        )
    }

    /// A port name is not a valid, stable identifier.
    #[must_use]
    pub fn invalid_port_name(name: &str) -> Self {
        Self::new(
            format!("Invalid port name '{name}'"),
            vec![name.to_string()],
            ContractErrorInfo::new("SHAPE-002-NAME", format!("'{name}' is not a valid port name"))
                .with_fix_hint("Use lowercase letters, digits and dashes, starting with a letter."),
        )
    }

    /// A port was bound to a value of a different type.
    #[must_use]
    pub fn type_mismatch(port: &str, expected: &str, found: &str) -> Self {
        Self::new(
            format!("Port '{port}' carries '{expected}' but was bound to '{found}'"),
            vec![port.to_string()],
            ContractErrorInfo::new("SHAPE-003-TYPE", format!("type mismatch on '{port}'"))
                .with_context_entry("expected", expected)
                .with_context_entry("found", found)
                .with_fix_hint("Connect outlets only to inlets of the same record type."),
        )
    }

    /// A port name does not exist on the shape.
    #[must_use]
    pub fn unknown_port(owner: &str, port: &str) -> Self {
        Self::new(
            format!("'{owner}' has no port named '{port}'"),
            vec![format!("{owner}.{port}")],
            ContractErrorInfo::new("SHAPE-004-UNKNOWN_PORT", format!("unknown port '{owner}.{port}'"))
                .with_fix_hint("Check the port name against the streamlet's declared shape."),
        )
    }

    /// An inlet has nothing feeding it.
    #[must_use]
    pub fn unconnected_inlet(port: &str) -> Self {
        Self::new(
            format!("Inlet '{port}' is not connected"),
            vec![port.to_string()],
            ContractErrorInfo::new("SHAPE-005-UNCONNECTED", format!("inlet '{port}' has no upstream"))
                .with_fix_hint("Connect every inlet to exactly one outlet or provide an inlet tap."),
        )
    }

    /// An inlet is fed from more than one outlet.
    #[must_use]
    pub fn inlet_already_connected(port: &str) -> Self {
        Self::new(
            format!("Inlet '{port}' is already connected"),
            vec![port.to_string()],
            ContractErrorInfo::new("SHAPE-005-UNCONNECTED", format!("inlet '{port}' connected twice"))
                .with_fix_hint("An inlet reads from exactly one outlet."),
        )
    }

    /// The logic variant does not fit the declared shape.
    #[must_use]
    pub fn logic_kind(kind: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            format!("{kind} logic does not fit shape: {reason}"),
            Vec::new(),
            ContractErrorInfo::new("SHAPE-006-LOGIC_KIND", reason)
                .with_fix_hint("Pick the logic variant matching the inlets and outlets declared."),
        )
    }

    /// A port was opened twice while building one graph.
    #[must_use]
    pub fn port_taken(port: &str) -> Self {
        Self::new(
            format!("Port '{port}' was already used by this logic"),
            vec![port.to_string()],
            ContractErrorInfo::new("SHAPE-007-PORT_TAKEN", format!("port '{port}' opened twice"))
                .with_fix_hint("Open each inlet and outlet once per logic; share the stream instead."),
        )
    }
}

/// Error raised when pipeline assembly fails outside of port checks.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The streamlets involved in the error.
    pub streamlets: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            streamlets: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the streamlets involved.
    #[must_use]
    pub fn with_streamlets(mut self, streamlets: Vec<String>) -> Self {
        self.streamlets = streamlets;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }
}

/// Error raised when offsets from different partitions are compared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot compare offsets of partition {left} with partition {right}")]
pub struct InvalidComparisonError {
    /// Partition of the left operand.
    pub left: PartitionId,
    /// Partition of the right operand.
    pub right: PartitionId,
}

impl InvalidComparisonError {
    /// Creates a new invalid comparison error.
    #[must_use]
    pub fn new(left: PartitionId, right: PartitionId) -> Self {
        Self { left, right }
    }
}

/// Error raised when the external log rejects a commit.
#[derive(Debug, Clone, Error)]
#[error("Commit failed for partition {partition} at position {position} after {attempts} attempt(s): {reason}")]
pub struct CommitFailureError {
    /// The partition being committed.
    pub partition: PartitionId,
    /// The high-water position being committed.
    pub position: u64,
    /// How many attempts were made.
    pub attempts: usize,
    /// The underlying reason.
    pub reason: String,
}

impl CommitFailureError {
    /// Creates a failure for a single attempt.
    #[must_use]
    pub fn new(partition: PartitionId, position: u64, reason: impl Into<String>) -> Self {
        Self {
            partition,
            position,
            attempts: 1,
            reason: reason.into(),
        }
    }

    /// Records the number of attempts made before giving up.
    #[must_use]
    pub fn after_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }
}

/// A record rejected by stage-specific validation.
///
/// Malformed records are data: they travel to an "invalid" outlet through a
/// split sink rather than being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord<T> {
    /// The rejected record.
    pub record: T,
    /// Why it was rejected.
    pub reason: String,
}

impl<T> MalformedRecord<T> {
    /// Creates a new malformed record.
    #[must_use]
    pub fn new(record: T, reason: impl Into<String>) -> Self {
        Self {
            record,
            reason: reason.into(),
        }
    }
}

impl<T> fmt::Display for MalformedRecord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed record: {}", self.reason)
    }
}

impl<T: fmt::Debug> std::error::Error for MalformedRecord<T> {}

impl<T> From<MalformedRecord<T>> for StreamletError {
    fn from(err: MalformedRecord<T>) -> Self {
        Self::MalformedRecord { reason: err.reason }
    }
}
