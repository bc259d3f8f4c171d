//! Per-start context handed to streamlet logic.

use crate::cancellation::CancellationToken;
use crate::commit::{CommitLog, Committer};
use crate::config::{ResetPosition, StreamletSettings};
use crate::core::{DeliveryMode, Envelope, Record};
use crate::errors::{MalformedRecord, Result, ShapeMismatchError};
use crate::log::{downcast_topic, AnyTopic, Topic};
use crate::shape::{Inlet, Outlet, Shape};
use crate::state::StateStore;
use crate::stream::source::{read_topic, start_positions};
use crate::stream::{
    BatchWriter, CommittableSink, ContextStream, Discard, FnEffect, OutletWriter, PlainSink,
    PlainStream, SplitWriter,
};
use futures::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct BoundInlet {
    topic: Arc<dyn AnyTopic>,
    reset: Option<ResetPosition>,
    bounded: bool,
}

/// Typed access to a streamlet's ports and resources for one start.
///
/// Each port can be opened once per start. Every committable sink created
/// from one context shares a single [`Committer`], whose consumer group is
/// the streamlet name.
pub struct StreamletContext {
    name: String,
    shape: Shape,
    settings: StreamletSettings,
    inlets: HashMap<String, BoundInlet>,
    outlets: HashMap<String, Arc<dyn AnyTopic>>,
    opened: HashSet<(bool, String)>,
    commit_log: Arc<dyn CommitLog>,
    committer: Option<Arc<Committer>>,
    cancel: Arc<CancellationToken>,
    state_store: Arc<StateStore>,
}

impl fmt::Debug for StreamletContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamletContext")
            .field("name", &self.name)
            .field("inlets", &self.inlets.keys().collect::<Vec<_>>())
            .field("outlets", &self.outlets.keys().collect::<Vec<_>>())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl StreamletContext {
    pub(crate) fn new(
        name: impl Into<String>,
        shape: Shape,
        settings: StreamletSettings,
        commit_log: Arc<dyn CommitLog>,
        cancel: Arc<CancellationToken>,
        state_store: Arc<StateStore>,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            settings,
            inlets: HashMap::new(),
            outlets: HashMap::new(),
            opened: HashSet::new(),
            commit_log,
            committer: None,
            cancel,
            state_store,
        }
    }

    /// Binds an inlet to the topic it reads. Bounded inlets stop at the
    /// topic's end as of the moment the source is opened.
    pub(crate) fn bind_inlet(
        &mut self,
        port: impl Into<String>,
        topic: Arc<dyn AnyTopic>,
        reset: Option<ResetPosition>,
        bounded: bool,
    ) {
        self.inlets.insert(
            port.into(),
            BoundInlet {
                topic,
                reset,
                bounded,
            },
        );
    }

    /// Binds an outlet to the topic it writes.
    pub(crate) fn bind_outlet(&mut self, port: impl Into<String>, topic: Arc<dyn AnyTopic>) {
        self.outlets.insert(port.into(), topic);
    }

    /// Gets the streamlet name, which is also its consumer group.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the streamlet's shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Gets the settings of this start.
    #[must_use]
    pub fn settings(&self) -> &StreamletSettings {
        &self.settings
    }

    /// Gets the token that stops sources.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Gets the state store of this start.
    #[must_use]
    pub fn state_store(&self) -> Arc<StateStore> {
        Arc::clone(&self.state_store)
    }

    /// Gets the committer shared by this context's committable sinks.
    pub fn committer(&mut self) -> Arc<Committer> {
        let committer = self.committer.get_or_insert_with(|| {
            Arc::new(Committer::new(
                self.name.clone(),
                self.settings.commit.clone(),
                Arc::clone(&self.commit_log),
            ))
        });
        Arc::clone(committer)
    }

    fn claim(&mut self, inlet: bool, port: &str) -> Result<(), ShapeMismatchError> {
        if self.opened.insert((inlet, port.to_string())) {
            Ok(())
        } else {
            Err(ShapeMismatchError::port_taken(port))
        }
    }

    fn open_inlet<T: Record>(&mut self, inlet: &Inlet<T>, mode: DeliveryMode) -> Result<BoxStream<'static, Envelope<T>>> {
        self.shape.check_inlet(&self.name, inlet)?;
        let binding = self
            .inlets
            .get(inlet.name())
            .ok_or_else(|| ShapeMismatchError::unconnected_inlet(inlet.name()))?;
        let topic: Arc<Topic<T>> = downcast_topic(Arc::clone(&binding.topic), inlet.name())?;
        let reset = binding.reset.unwrap_or(self.settings.reset_position);
        let bounded = binding.bounded;
        self.claim(true, inlet.name())?;

        let group = (mode == DeliveryMode::Context).then_some(self.name.as_str());
        let positions = start_positions(&topic, group, reset);
        let bound = bounded.then(|| {
            (0..topic.partition_count())
                .map(|p| topic.end_position(p))
                .collect::<Vec<_>>()
        });
        debug!(
            streamlet = %self.name,
            inlet = inlet.name(),
            topic = topic.name(),
            ?positions,
            mode = %mode,
            "Opening source"
        );

        Ok(read_topic(
            topic,
            positions,
            bound,
            self.settings.buffer_size,
            Arc::clone(&self.cancel),
        ))
    }

    /// Opens an inlet in context mode: every value carries its offset and
    /// reading resumes after the last committed position.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] if the inlet is not declared, has a
    /// different type, is unbound or was already opened.
    pub fn source_with_context<T: Record>(&mut self, inlet: &Inlet<T>) -> Result<ContextStream<T>> {
        Ok(ContextStream::from_stream(self.open_inlet(inlet, DeliveryMode::Context)?))
    }

    /// Opens an inlet in plain mode: no offsets, reading starts at the
    /// reset position on every start.
    ///
    /// # Errors
    ///
    /// Same as [`StreamletContext::source_with_context`].
    pub fn plain_source<T: Record>(&mut self, inlet: &Inlet<T>) -> Result<PlainStream<T>> {
        let stream = self.open_inlet(inlet, DeliveryMode::Plain)?;
        Ok(PlainStream::from_stream(stream.map(Envelope::into_value)))
    }

    fn outlet_writer<T: Record>(&mut self, outlet: &Outlet<T>) -> Result<OutletWriter<T>> {
        self.shape.check_outlet(&self.name, outlet)?;
        let erased = self
            .outlets
            .get(outlet.name())
            .cloned()
            .ok_or_else(|| ShapeMismatchError::unknown_port(&self.name, outlet.name()))?;
        let topic: Arc<Topic<T>> = downcast_topic(erased, outlet.name())?;
        self.claim(false, outlet.name())?;
        Ok(OutletWriter::new(outlet.name(), topic, outlet.create_partitioner()))
    }

    /// A sink writing each value to `outlet`, then committing its offset.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] if the outlet is not declared, has a
    /// different type or was already opened.
    pub fn committable_sink<T: Record>(&mut self, outlet: &Outlet<T>) -> Result<CommittableSink<T>> {
        let writer = self.outlet_writer(outlet)?;
        Ok(CommittableSink::new(writer, self.committer()))
    }

    /// A sink writing every element of a batch to `outlet`, then
    /// committing the batch's offset.
    ///
    /// # Errors
    ///
    /// Same as [`StreamletContext::committable_sink`].
    pub fn committable_batch_sink<T: Record>(&mut self, outlet: &Outlet<T>) -> Result<CommittableSink<Vec<T>>> {
        let writer = self.outlet_writer(outlet)?;
        Ok(CommittableSink::new(BatchWriter(writer), self.committer()))
    }

    /// A sink routing `Ok` values to `valid` and malformed records to
    /// `invalid`, then committing.
    ///
    /// # Errors
    ///
    /// Same as [`StreamletContext::committable_sink`], for either outlet.
    pub fn split_sink<V: Record, I: Record>(
        &mut self,
        valid: &Outlet<V>,
        invalid: &Outlet<MalformedRecord<I>>,
    ) -> Result<CommittableSink<std::result::Result<V, MalformedRecord<I>>>> {
        let valid = self.outlet_writer(valid)?;
        let invalid = self.outlet_writer(invalid)?;
        Ok(CommittableSink::new(SplitWriter { valid, invalid }, self.committer()))
    }

    /// A sink running a user effect per value, then committing.
    pub fn effect_sink<T, F, Fut>(&mut self, effect: F) -> CommittableSink<T>
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        CommittableSink::new(FnEffect::new(effect), self.committer())
    }

    /// A sink that only commits offsets.
    pub fn commit_sink<T: Send + 'static>(&mut self) -> CommittableSink<T> {
        CommittableSink::new(Discard::default(), self.committer())
    }

    /// A plain sink writing to `outlet`.
    ///
    /// # Errors
    ///
    /// Same as [`StreamletContext::committable_sink`].
    pub fn plain_sink<T: Record>(&mut self, outlet: &Outlet<T>) -> Result<PlainSink<T>> {
        Ok(PlainSink::new(self.outlet_writer(outlet)?))
    }

    /// A plain sink running a user effect per value.
    pub fn plain_effect_sink<T, F, Fut>(&mut self, effect: F) -> PlainSink<T>
    where
        T: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        PlainSink::new(FnEffect::new(effect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PartitionId;
    use crate::errors::StreamletError;
    use crate::log::InMemoryLog;

    struct Fixture {
        log: InMemoryLog,
        ctx: StreamletContext,
        input: Inlet<u64>,
        output: Outlet<String>,
    }

    fn fixture(bounded: bool) -> Fixture {
        let input = Inlet::<u64>::new("in");
        let output = Outlet::<String>::new("out");
        let shape = Shape::builder().inlet(&input).outlet(&output).build().unwrap();
        let log = InMemoryLog::new();
        let source = log.create_topic::<u64>("numbers", 1).unwrap();
        let sink = log.create_topic::<String>("words", 1).unwrap();
        let settings = StreamletSettings::default().with_reset_position(ResetPosition::Earliest);

        let mut ctx = StreamletContext::new(
            "fmt",
            shape,
            settings,
            Arc::new(log.commit_log("fmt")),
            Arc::new(CancellationToken::new()),
            Arc::new(StateStore::new()),
        );
        ctx.bind_inlet("in", source, None, bounded);
        ctx.bind_outlet("out", sink);
        Fixture {
            log,
            ctx,
            input,
            output,
        }
    }

    #[tokio::test]
    async fn test_context_round_trip_commits() {
        let Fixture {
            log,
            mut ctx,
            input,
            output,
        } = fixture(true);
        let numbers = log.topic::<u64>("numbers").unwrap();
        for v in 0..4 {
            numbers.append(0, v);
        }

        let graph = ctx
            .source_with_context(&input)
            .unwrap()
            .map(|v| format!("n{v}"))
            .to(ctx.committable_sink(&output).unwrap());
        graph.run().await.unwrap();

        let words = log.topic::<String>("words").unwrap();
        assert_eq!(words.values(), vec!["n0", "n1", "n2", "n3"]);
        assert_eq!(log.committed("fmt", &PartitionId::new("numbers", 0)), Some(3));
    }

    #[test]
    fn test_port_opened_twice() {
        let Fixture {
            mut ctx,
            input,
            output,
            ..
        } = fixture(true);
        assert!(ctx.source_with_context(&input).is_ok());
        let err = ctx.source_with_context(&input).unwrap_err();
        assert!(matches!(err, StreamletError::ShapeMismatch(ref e) if e.error_info.code == "SHAPE-007-PORT_TAKEN"));

        assert!(ctx.committable_sink(&output).is_ok());
        assert!(ctx.plain_sink(&output).is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let Fixture { mut ctx, .. } = fixture(true);
        let err = ctx.source_with_context(&Inlet::<String>::new("in")).unwrap_err();
        assert!(matches!(err, StreamletError::ShapeMismatch(ref e) if e.error_info.code == "SHAPE-003-TYPE"));
    }

    #[tokio::test]
    async fn test_batch_sink_commits_group_end() {
        let Fixture {
            log,
            mut ctx,
            input,
            output,
        } = fixture(true);
        let numbers = log.topic::<u64>("numbers").unwrap();
        for v in 0..5 {
            numbers.append(0, v);
        }

        let graph = ctx
            .source_with_context(&input)
            .unwrap()
            .map(|v| v.to_string())
            .grouped(2)
            .collapse()
            .to(ctx.committable_batch_sink(&output).unwrap());
        graph.run().await.unwrap();

        let words = log.topic::<String>("words").unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(log.committed("fmt", &PartitionId::new("numbers", 0)), Some(4));
    }

    #[tokio::test]
    async fn test_commit_sink_only_commits() {
        let Fixture { log, mut ctx, input, .. } = fixture(true);
        let numbers = log.topic::<u64>("numbers").unwrap();
        numbers.append(0, 9);

        let graph = ctx.source_with_context(&input).unwrap().to(ctx.commit_sink());
        graph.run().await.unwrap();

        assert!(log.topic::<String>("words").unwrap().is_empty());
        assert_eq!(log.committed("fmt", &PartitionId::new("numbers", 0)), Some(0));
    }

    #[tokio::test]
    async fn test_plain_source_never_commits() {
        let Fixture { log, mut ctx, input, .. } = fixture(true);
        let numbers = log.topic::<u64>("numbers").unwrap();
        numbers.append(0, 1);
        numbers.append(0, 2);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);

        let sink = ctx.plain_effect_sink(move |v: u64| {
            sink_seen.lock().push(v);
            async { Ok::<(), anyhow::Error>(()) }
        });
        ctx.plain_source(&input).unwrap().to(sink).run().await.unwrap();

        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(log.committed("fmt", &PartitionId::new("numbers", 0)), None);
    }

    #[test]
    fn test_shared_committer() {
        let Fixture { mut ctx, .. } = fixture(true);
        let a = ctx.committer();
        let b = ctx.committer();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "fmt");
    }
}
