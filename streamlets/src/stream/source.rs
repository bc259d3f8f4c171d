//! Topic readers backing inlet sources.

use crate::cancellation::CancellationToken;
use crate::config::ResetPosition;
use crate::core::{Envelope, Record};
use crate::log::{AnyTopic, Topic};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Where a source starts reading each partition.
///
/// A committed position `c` means `c` was processed, so reading resumes at
/// `c + 1`. Without a commit, or for plain sources, `reset` decides.
pub(crate) fn start_positions<T: Record>(
    topic: &Topic<T>,
    group: Option<&str>,
    reset: ResetPosition,
) -> Vec<u64> {
    (0..topic.partition_count())
        .map(|partition| {
            let start = topic.start_position(partition);
            let committed = group.and_then(|g| AnyTopic::committed(topic, g, partition));
            match (committed, reset) {
                (Some(position), _) => (position + 1).max(start),
                (None, ResetPosition::Earliest) => start,
                (None, ResetPosition::Latest) => topic.end_position(partition),
            }
        })
        .collect()
}

struct Reader<T> {
    topic: Arc<Topic<T>>,
    positions: Vec<u64>,
    bound: Option<Vec<u64>>,
    buffer: usize,
    next: usize,
    cancel: Arc<CancellationToken>,
}

impl<T: Record> Reader<T> {
    /// Reads the next non-empty window, visiting partitions round-robin.
    fn poll_batch(&mut self) -> Vec<Envelope<T>> {
        let count = self.positions.len();
        for step in 0..count {
            let partition = (self.next + step) % count;
            let from = self.positions[partition];
            let limit = match &self.bound {
                Some(bound) => {
                    let left = usize::try_from(bound[partition].saturating_sub(from)).unwrap_or(usize::MAX);
                    left.min(self.buffer)
                }
                None => self.buffer,
            };
            if limit == 0 {
                continue;
            }
            let index = u32::try_from(partition).unwrap_or(u32::MAX);
            let batch = self.topic.read(index, from, limit);
            if let Some(last) = batch.last() {
                self.positions[partition] = last.offset().position() + 1;
                self.next = (partition + 1) % count;
                return batch;
            }
        }
        Vec::new()
    }
}

/// Streams a topic from `positions`.
///
/// With a `bound`, the stream ends once every partition reaches it.
/// Otherwise it waits for appends until `cancel` fires.
pub(crate) fn read_topic<T: Record>(
    topic: Arc<Topic<T>>,
    positions: Vec<u64>,
    bound: Option<Vec<u64>>,
    buffer: usize,
    cancel: Arc<CancellationToken>,
) -> BoxStream<'static, Envelope<T>> {
    let reader = Reader {
        topic,
        positions,
        bound,
        buffer: buffer.max(1),
        next: 0,
        cancel,
    };

    stream::unfold(reader, |mut reader| async move {
        loop {
            if reader.cancel.is_cancelled() {
                debug!(topic = reader.topic.name(), "Source cancelled");
                return None;
            }
            let topic = Arc::clone(&reader.topic);
            let appended = topic.appended();
            let batch = reader.poll_batch();
            if !batch.is_empty() {
                return Some((batch, reader));
            }
            if reader.bound.is_some() {
                return None;
            }
            let cancel = Arc::clone(&reader.cancel);
            tokio::select! {
                () = appended => {}
                () = cancel.cancelled() => {}
            }
        }
    })
    .flat_map(stream::iter)
    .boxed()
}
