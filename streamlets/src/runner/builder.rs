//! Pipeline builder with wiring validation.

use super::runner::{PipelineRunner, StreamletEntry};
use crate::config::StreamletSettings;
use crate::core::Record;
use crate::errors::{ContractErrorInfo, PipelineValidationError, Result, ShapeMismatchError};
use crate::events::{EventSink, NoOpEventSink};
use crate::log::{AnyTopic, InMemoryLog, Topic};
use crate::shape::{is_valid_name, PortSpec};
use crate::stages::Streamlet;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Name of the topic backing `streamlet`'s outlet `port`.
#[must_use]
pub fn outlet_topic_name(streamlet: &str, port: &str) -> String {
    format!("{streamlet}.{port}")
}

/// Collects streamlets and connections and validates them into a
/// [`PipelineRunner`].
///
/// Connections go from an outlet (`"producer.out"`) or an external topic
/// added with [`topic`](Self::topic) to an inlet (`"consumer.in"`).
pub struct PipelineBuilder {
    name: String,
    streamlets: Vec<(String, Arc<dyn Streamlet>)>,
    topics: Vec<Arc<dyn AnyTopic>>,
    connections: Vec<(String, String)>,
    settings: StreamletSettings,
    overrides: HashMap<String, StreamletSettings>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("streamlets", &self.streamlets.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            streamlets: Vec::new(),
            topics: Vec::new(),
            connections: Vec::new(),
            settings: StreamletSettings::default(),
            overrides: HashMap::new(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Adds a streamlet under `name`, which is also its consumer group.
    #[must_use]
    pub fn streamlet(mut self, name: impl Into<String>, streamlet: Arc<dyn Streamlet>) -> Self {
        self.streamlets.push((name.into(), streamlet));
        self
    }

    /// Adds an external topic that inlets can be connected to by name.
    #[must_use]
    pub fn topic<T: Record>(mut self, topic: Topic<T>) -> Self {
        self.topics.push(Arc::new(topic));
        self
    }

    /// Connects `from` (an outlet or external topic) to the inlet `to`.
    #[must_use]
    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.connections.push((from.into(), to.into()));
        self
    }

    /// Sets the settings used by every streamlet without an override.
    #[must_use]
    pub fn with_settings(mut self, settings: StreamletSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the settings of one streamlet.
    #[must_use]
    pub fn with_streamlet_settings(mut self, name: impl Into<String>, settings: StreamletSettings) -> Self {
        self.overrides.insert(name.into(), settings);
        self
    }

    /// Sets the sink that receives lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Validates the wiring and returns a runner in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineValidationError`] for an empty pipeline, a
    /// duplicate or invalid name, an unknown streamlet or invalid settings,
    /// and a [`ShapeMismatchError`] for an unknown port, mismatched types,
    /// an inlet connected twice or an unconnected inlet.
    pub fn build(self) -> Result<PipelineRunner> {
        if self.streamlets.is_empty() {
            return Err(PipelineValidationError::new(format!("Pipeline '{}' has no streamlets", self.name))
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-001-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one streamlet before building."),
                )
                .into());
        }

        let mut entries: Vec<StreamletEntry> = Vec::with_capacity(self.streamlets.len());
        let mut seen = HashSet::new();
        for (name, streamlet) in self.streamlets {
            if !is_valid_name(&name) {
                return Err(invalid_name(&name).into());
            }
            if !seen.insert(name.clone()) {
                return Err(duplicate_name(&name).into());
            }
            let shape = streamlet.shape()?;
            let settings = self.overrides.get(&name).unwrap_or(&self.settings).clone();
            settings.validate()?;
            entries.push(StreamletEntry {
                name,
                streamlet,
                shape,
                settings,
                inputs: HashMap::new(),
            });
        }
        if let Some(unknown) = self.overrides.keys().find(|n| !seen.contains(*n)) {
            return Err(unknown_streamlet(unknown).into());
        }

        let mut external: HashMap<String, Arc<dyn AnyTopic>> = HashMap::new();
        for topic in self.topics {
            let name = topic.name().to_string();
            let clashes = entries
                .iter()
                .any(|e| e.shape.outlets().iter().any(|o| outlet_topic_name(&e.name, &o.name) == name));
            if clashes || external.contains_key(&name) {
                return Err(duplicate_name(&name).into());
            }
            external.insert(name, topic);
        }

        for (from, to) in &self.connections {
            let (upstream, type_id, type_name) = resolve_upstream(&entries, &external, from)?;
            let (owner, port) = split_port(to).ok_or_else(|| unknown_streamlet(to))?;
            let entry = entries
                .iter_mut()
                .find(|e| e.name == owner)
                .ok_or_else(|| unknown_streamlet(owner))?;
            let inlet = entry
                .shape
                .inlet(port)
                .ok_or_else(|| ShapeMismatchError::unknown_port(owner, port))?;
            if inlet.type_id != type_id {
                return Err(ShapeMismatchError::type_mismatch(to, inlet.type_name, type_name).into());
            }
            if entry.inputs.insert(port.to_string(), upstream).is_some() {
                return Err(ShapeMismatchError::inlet_already_connected(to).into());
            }
        }

        for entry in &entries {
            for inlet in entry.shape.inlets() {
                if !entry.inputs.contains_key(&inlet.name) {
                    return Err(ShapeMismatchError::unconnected_inlet(&format!("{}.{}", entry.name, inlet.name)).into());
                }
            }
        }

        let log = InMemoryLog::new();
        for topic in external.into_values() {
            log.register(topic);
        }
        Ok(PipelineRunner::new(self.name, entries, log, self.event_sink))
    }
}

fn split_port(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once('.')
}

fn resolve_upstream(
    entries: &[StreamletEntry],
    external: &HashMap<String, Arc<dyn AnyTopic>>,
    from: &str,
) -> Result<(String, TypeId, &'static str)> {
    if let Some(topic) = external.get(from) {
        return Ok((from.to_string(), topic.record_type_id(), topic.record_type()));
    }
    let (owner, port) = split_port(from).ok_or_else(|| unknown_streamlet(from))?;
    let entry = entries
        .iter()
        .find(|e| e.name == owner)
        .ok_or_else(|| unknown_streamlet(owner))?;
    let outlet: &PortSpec = entry
        .shape
        .outlet(port)
        .ok_or_else(|| ShapeMismatchError::unknown_port(owner, port))?;
    Ok((outlet_topic_name(owner, port), outlet.type_id, outlet.type_name))
}

fn unknown_streamlet(name: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Unknown streamlet or topic '{name}'"))
        .with_streamlets(vec![name.to_string()])
        .with_error_info(
            ContractErrorInfo::new("PIPELINE-003-UNKNOWN", format!("'{name}' is not part of the pipeline"))
                .with_fix_hint("Connect ports as 'streamlet.port' or name a topic added with `topic`."),
        )
}

fn duplicate_name(name: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("Name '{name}' is used twice"))
        .with_streamlets(vec![name.to_string()])
        .with_error_info(ContractErrorInfo::new(
            "PIPELINE-002-DUPLICATE",
            format!("'{name}' names more than one streamlet or topic"),
        ))
}

fn invalid_name(name: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!("'{name}' is not a valid streamlet name"))
        .with_streamlets(vec![name.to_string()])
        .with_error_info(
            ContractErrorInfo::new("PIPELINE-004-NAME", format!("invalid streamlet name '{name}'"))
                .with_fix_hint("Use lowercase letters, digits and dashes, starting with a letter."),
        )
}
