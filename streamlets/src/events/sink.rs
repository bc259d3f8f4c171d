//! Sinks for runner lifecycle events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives lifecycle events from the pipeline runner.
///
/// Implementations only have to provide [`try_emit`](Self::try_emit);
/// [`emit`](Self::emit) defaults to it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Records an event without waiting. Must not fail; problems are logged.
    fn try_emit(&self, kind: &str, payload: Option<Value>);

    /// Records an event, waiting for sinks that deliver asynchronously.
    async fn emit(&self, kind: &str, payload: Option<Value>) {
        self.try_emit(kind, payload);
    }
}

/// Discards all events. The runner's default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _kind: &str, _payload: Option<Value>) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    verbose: bool,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingEventSink {
    /// Creates a logging sink. `DEBUG` and `TRACE` log at debug level,
    /// anything else at info.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            verbose: level >= Level::DEBUG,
        }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, kind: &str, payload: Option<Value>) {
        let payload = payload.unwrap_or(Value::Null);
        if self.verbose {
            debug!(event = kind, payload = %payload, "Lifecycle event");
        } else {
            info!(event = kind, payload = %payload, "Lifecycle event");
        }
    }
}

/// One event held by a [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    /// Event name, such as `pipeline.started`.
    pub kind: String,
    /// Event details, if the runner attached any.
    pub payload: Option<Value>,
    /// When the sink received the event.
    pub received_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Looks up a top-level field of the payload.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_ref().and_then(|p| p.get(name))
    }
}

/// Keeps every event in arrival order, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    received: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.received.lock().clone()
    }

    /// Event names, in arrival order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.received.lock().iter().map(|e| e.kind.clone()).collect()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<LifecycleEvent> {
        self.received
            .lock()
            .iter()
            .filter(|e| e.kind.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    /// True before the first event arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }

    /// Forgets all received events.
    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, kind: &str, payload: Option<Value>) {
        self.received.lock().push(LifecycleEvent {
            kind: kind.to_string(),
            payload,
            received_at: Utc::now(),
        });
    }
}
