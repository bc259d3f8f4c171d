//! Sinks: effects applied to stream values, optionally followed by a commit.

use crate::commit::Committer;
use crate::core::{Envelope, Record};
use crate::errors::{MalformedRecord, Result, StreamletError};
use crate::log::Topic;
use crate::partition::Partitioner;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The side effect a sink performs for each value.
#[async_trait]
pub trait SinkEffect<T>: Send {
    /// Applies the effect. The value's offset is recorded only after this
    /// returns `Ok`.
    async fn apply(&mut self, value: T) -> Result<()>;
}

/// Writes values to an outlet's topic.
pub struct OutletWriter<T> {
    port: String,
    topic: Arc<Topic<T>>,
    partitioner: Box<dyn Partitioner<T>>,
}

impl<T: Record> OutletWriter<T> {
    pub(crate) fn new(port: impl Into<String>, topic: Arc<Topic<T>>, partitioner: Box<dyn Partitioner<T>>) -> Self {
        Self {
            port: port.into(),
            topic,
            partitioner,
        }
    }

    /// Gets the outlet name.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }

    fn write(&mut self, value: T) {
        let key = self.partitioner.route(&value);
        let offset = self.topic.append_routed(&key, value);
        debug!(port = %self.port, offset = %offset, "Wrote record");
    }
}

impl<T> fmt::Debug for OutletWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutletWriter")
            .field("port", &self.port)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Record> SinkEffect<T> for OutletWriter<T> {
    async fn apply(&mut self, value: T) -> Result<()> {
        self.write(value);
        Ok(())
    }
}

/// Writes every element of a batch to an outlet.
#[derive(Debug)]
pub struct BatchWriter<T>(pub(crate) OutletWriter<T>);

#[async_trait]
impl<T: Record> SinkEffect<Vec<T>> for BatchWriter<T> {
    async fn apply(&mut self, values: Vec<T>) -> Result<()> {
        for value in values {
            self.0.write(value);
        }
        Ok(())
    }
}

/// Routes valid values to one outlet and malformed ones to another.
#[derive(Debug)]
pub struct SplitWriter<V, I> {
    pub(crate) valid: OutletWriter<V>,
    pub(crate) invalid: OutletWriter<MalformedRecord<I>>,
}

#[async_trait]
impl<V: Record, I: Record> SinkEffect<std::result::Result<V, MalformedRecord<I>>> for SplitWriter<V, I> {
    async fn apply(&mut self, value: std::result::Result<V, MalformedRecord<I>>) -> Result<()> {
        match value {
            Ok(valid) => self.valid.write(valid),
            Err(malformed) => {
                warn!(port = %self.invalid.port, reason = %malformed.reason, "Routing malformed record");
                self.invalid.write(malformed);
            }
        }
        Ok(())
    }
}

/// A user-supplied asynchronous effect.
pub struct FnEffect<F> {
    f: F,
}

impl<F> FnEffect<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnEffect<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEffect").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, F, Fut> SinkEffect<T> for FnEffect<F>
where
    T: Send + 'static,
    F: FnMut(T) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn apply(&mut self, value: T) -> Result<()> {
        (self.f)(value).await.map_err(StreamletError::effect)
    }
}

/// Does nothing; used when only the commit matters.
pub struct Discard<T>(PhantomData<fn(T)>);

impl<T> Default for Discard<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<T: Send + 'static> SinkEffect<T> for Discard<T> {
    async fn apply(&mut self, _value: T) -> Result<()> {
        Ok(())
    }
}

/// A sink that applies an effect and then records the value's offset with
/// a [`Committer`].
pub struct CommittableSink<T> {
    effect: Box<dyn SinkEffect<T>>,
    committer: Arc<Committer>,
}

impl<T: Send + 'static> CommittableSink<T> {
    /// Creates a committable sink around any effect.
    pub fn new(effect: impl SinkEffect<T> + 'static, committer: Arc<Committer>) -> Self {
        Self {
            effect: Box::new(effect),
            committer,
        }
    }

    /// Gets the committer.
    #[must_use]
    pub fn committer(&self) -> &Arc<Committer> {
        &self.committer
    }
}

impl<T> fmt::Debug for CommittableSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittableSink")
            .field("committer", &self.committer)
            .finish_non_exhaustive()
    }
}

/// A sink without offset tracking.
pub struct PlainSink<T> {
    effect: Box<dyn SinkEffect<T>>,
}

impl<T: Send + 'static> PlainSink<T> {
    /// Creates a plain sink around any effect.
    pub fn new(effect: impl SinkEffect<T> + 'static) -> Self {
        Self {
            effect: Box::new(effect),
        }
    }
}

impl<T> fmt::Debug for PlainSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainSink").finish_non_exhaustive()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

async fn run_committable<T: Send + 'static>(
    stream: &mut BoxStream<'static, Result<Envelope<T>>>,
    sink: &mut CommittableSink<T>,
) -> Result<()> {
    loop {
        let deadline = sink.committer.next_deadline();
        tokio::select! {
            next = stream.next() => match next {
                Some(item) => {
                    let (value, offset) = item?.into_parts();
                    sink.effect.apply(value).await?;
                    sink.committer.record(offset).await?;
                }
                None => return Ok(()),
            },
            () = wait_until(deadline) => sink.committer.flush_if_due().await?,
        }
    }
}

/// Drives a context stream into a committable sink.
///
/// The committer is flushed when the stream ends. When the stream fails,
/// offsets of effects that already completed are still flushed on a best
/// effort basis before the error is returned.
pub(crate) async fn drive_committable<T: Send + 'static>(
    mut stream: BoxStream<'static, Result<Envelope<T>>>,
    mut sink: CommittableSink<T>,
) -> Result<()> {
    match run_committable(&mut stream, &mut sink).await {
        Ok(()) => Ok(sink.committer.flush().await?),
        Err(err) => {
            if !matches!(err, StreamletError::CommitFailure(_)) {
                if let Err(flush_err) = sink.committer.flush().await {
                    warn!(
                        committer = %sink.committer.name(),
                        error = %flush_err,
                        "Flush after stream failure did not complete"
                    );
                }
            }
            Err(err)
        }
    }
}

/// Drives a plain stream into a plain sink.
pub(crate) async fn drive_plain<T: Send + 'static>(
    mut stream: BoxStream<'static, Result<T>>,
    mut sink: PlainSink<T>,
) -> Result<()> {
    while let Some(item) = stream.next().await {
        sink.effect.apply(item?).await?;
    }
    Ok(())
}
