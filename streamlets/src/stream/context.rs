//! Streams that carry an offset context with every value.

use super::graph::RunnableGraph;
use super::plain::PlainStream;
use super::sink::{drive_committable, CommittableSink};
use crate::core::{group, split_by_partition, Envelope, Offset, OffsetGroup};
use crate::errors::{Result, StreamletError};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::future::Future;

/// A stream of values paired with the context they must be committed by.
///
/// Value-level operators (`map`, `filter`, `map_concat`, ...) never touch
/// the context, so every derived value keeps the offset of the record it came
/// from. Grouping changes the context to an [`OffsetGroup`], and only a
/// stream whose context is a plain [`Offset`] can be attached to a
/// committing sink with [`ContextStream::to`].
///
/// Errors travel in-band and end the stream at the sink.
pub struct ContextStream<T, C = Offset> {
    inner: BoxStream<'static, Result<Envelope<T, C>>>,
}

impl<T, C> std::fmt::Debug for ContextStream<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStream")
            .field("value", &std::any::type_name::<T>())
            .field("context", &std::any::type_name::<C>())
            .finish_non_exhaustive()
    }
}

impl<T, C> ContextStream<T, C>
where
    T: Send + 'static,
    C: Send + 'static,
{
    /// Wraps a stream of envelopes.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Envelope<T, C>> + Send + 'static,
    {
        Self {
            inner: stream.map(Ok).boxed(),
        }
    }

    /// Wraps a finite sequence of envelopes.
    pub fn from_envelopes<I>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = Envelope<T, C>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(envelopes))
    }

    pub(crate) fn from_results(inner: BoxStream<'static, Result<Envelope<T, C>>>) -> Self {
        Self { inner }
    }

    /// Transforms each value; contexts are unchanged.
    #[must_use]
    pub fn map<U, F>(self, mut f: F) -> ContextStream<U, C>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        ContextStream {
            inner: self.inner.map(move |item| item.map(|env| env.map(&mut f))).boxed(),
        }
    }

    /// Transforms each value with a fallible function. An error ends the
    /// stream and fails the graph.
    #[must_use]
    pub fn try_map<U, F>(self, mut f: F) -> ContextStream<U, C>
    where
        U: Send + 'static,
        F: FnMut(T) -> Result<U> + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .map(move |item| {
                    item.and_then(|env| {
                        let (value, context) = env.into_parts();
                        f(value).map(|out| Envelope::from_parts(out, context))
                    })
                })
                .boxed(),
        }
    }

    /// Transforms each value asynchronously, one at a time.
    #[must_use]
    pub fn map_async<U, F, Fut>(self, mut f: F) -> ContextStream<U, C>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .then(move |item| {
                    let pending = item.map(|env| {
                        let (value, context) = env.into_parts();
                        (f(value), context)
                    });
                    async move {
                        match pending {
                            Ok((fut, context)) => Ok(Envelope::from_parts(fut.await, context)),
                            Err(err) => Err(err),
                        }
                    }
                })
                .boxed(),
        }
    }

    /// Keeps values matching `predicate`. A dropped value's offset is never
    /// recorded; the next recorded offset of its partition covers it.
    #[must_use]
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            inner: self
                .inner
                .filter(move |item| {
                    future::ready(match item {
                        Ok(env) => predicate(env.value()),
                        Err(_) => true,
                    })
                })
                .boxed(),
        }
    }

    /// Maps and drops in one step.
    #[must_use]
    pub fn filter_map<U, F>(self, mut f: F) -> ContextStream<U, C>
    where
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .filter_map(move |item| {
                    future::ready(match item {
                        Ok(env) => {
                            let (value, context) = env.into_parts();
                            f(value).map(|out| Ok(Envelope::from_parts(out, context)))
                        }
                        Err(err) => Some(Err(err)),
                    })
                })
                .boxed(),
        }
    }

    /// Expands each value into many; every output carries a copy of the
    /// input's context.
    ///
    /// Each copy reaches the sink's committer as its own `record` call.
    /// Copies share a position, so once the first copy's effect completes a
    /// flush may commit that position while later copies are still pending.
    #[must_use]
    pub fn map_concat<U, I, F>(self, mut f: F) -> ContextStream<U, C>
    where
        C: Clone,
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: FnMut(T) -> I + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .flat_map(move |item| {
                    let expanded: Vec<Result<Envelope<U, C>>> = match item {
                        Ok(env) => env.map_concat(&mut f).into_iter().map(Ok).collect(),
                        Err(err) => vec![Err(err)],
                    };
                    stream::iter(expanded)
                })
                .boxed(),
        }
    }

    /// Drops the contexts. Progress made by a plain stream is never
    /// committed.
    #[must_use]
    pub fn into_plain(self) -> PlainStream<T> {
        PlainStream::from_results(self.inner.map(|item| item.map(Envelope::into_value)).boxed())
    }

    /// Unwraps the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> BoxStream<'static, Result<Envelope<T, C>>> {
        self.inner
    }
}

impl<T: Send + 'static> ContextStream<T, Offset> {
    /// Collects runs of `size` values. The context becomes the
    /// [`OffsetGroup`] of the run's offsets, in arrival order.
    ///
    /// A group never spans partitions; see [`fold_grouped`](Self::fold_grouped).
    #[must_use]
    pub fn grouped(self, size: usize) -> ContextStream<Vec<T>, OffsetGroup> {
        self.fold_grouped(size, Vec::new, |mut acc, value| {
            acc.push(value);
            acc
        })
    }

    /// Folds runs of `size` values into one accumulator each. The final run
    /// may be shorter when the stream ends.
    ///
    /// A run holding values of several partitions is split into one group
    /// per partition, so collapsing any group commits only positions it
    /// covers.
    #[must_use]
    pub fn fold_grouped<A, I, F>(self, size: usize, mut init: I, mut fold: F) -> ContextStream<A, OffsetGroup>
    where
        A: Send + 'static,
        I: FnMut() -> A + Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .chunks(size.max(1))
                .flat_map(move |chunk| {
                    let groups: Vec<Result<Envelope<A, OffsetGroup>>> =
                        match chunk.into_iter().collect::<Result<Vec<_>>>() {
                            Ok(envelopes) => split_by_partition(envelopes)
                                .into_iter()
                                .map(|run| {
                                    group(run, init(), &mut fold)
                                        .ok_or_else(|| StreamletError::Internal("empty group".to_string()))
                                })
                                .collect(),
                            Err(err) => vec![Err(err)],
                        };
                    stream::iter(groups)
                })
                .boxed(),
        }
    }

    /// Runs the stream into a committing sink.
    #[must_use]
    pub fn to(self, sink: CommittableSink<T>) -> RunnableGraph {
        RunnableGraph::new(drive_committable(self.inner, sink))
    }
}

impl<T: Send + 'static> ContextStream<T, OffsetGroup> {
    /// Resolves every group to its last offset.
    #[must_use]
    pub fn collapse(self) -> ContextStream<T, Offset> {
        ContextStream {
            inner: self.inner.map(|item| item.map(Envelope::collapse)).boxed(),
        }
    }

    /// Resolves every group with a custom picker returning an index into
    /// the group's offsets.
    #[must_use]
    pub fn collapse_with<P>(self, mut picker: P) -> ContextStream<T, Offset>
    where
        P: FnMut(&[Offset]) -> usize + Send + 'static,
    {
        ContextStream {
            inner: self
                .inner
                .map(move |item| item.map(|env| env.collapse_with(&mut picker)))
                .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PartitionId;

    fn numbered(values: impl IntoIterator<Item = u64>) -> ContextStream<u64> {
        let envelopes: Vec<Envelope<u64>> = values
            .into_iter()
            .map(|v| Envelope::attach(v, Offset::new(PartitionId::new("numbers", 0), v)))
            .collect();
        ContextStream::from_envelopes(envelopes)
    }

    async fn collect<T: Send + 'static, C: Send + 'static>(stream: ContextStream<T, C>) -> Vec<(T, C)> {
        stream
            .into_inner()
            .map(|item| item.unwrap().into_parts())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_map_and_filter_keep_offsets() {
        let out = collect(numbered(1..=6).filter(|v| v % 2 == 0).map(|v| v * 10)).await;
        let pairs: Vec<(u64, u64)> = out.into_iter().map(|(v, o)| (v, o.position())).collect();
        assert_eq!(pairs, vec![(20, 2), (40, 4), (60, 6)]);
    }

    #[tokio::test]
    async fn test_map_concat_duplicates_offset() {
        let out = collect(numbered([5]).map_concat(|v| vec![v, v + 1, v + 2])).await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(_, o)| o.position() == 5));
    }

    #[tokio::test]
    async fn test_filter_map() {
        let out = collect(numbered(1..=4).filter_map(|v| (v > 2).then(|| v.to_string()))).await;
        assert_eq!(out[0].0, "3");
        assert_eq!(out[1].1.position(), 4);
    }

    #[tokio::test]
    async fn test_grouped_then_collapse() {
        let grouped = collect(numbered(1..=5).grouped(2)).await;
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].0, vec![1, 2]);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[2].0, vec![5]);

        let collapsed = collect(numbered(1..=5).grouped(2).collapse()).await;
        let positions: Vec<u64> = collapsed.iter().map(|(_, o)| o.position()).collect();
        assert_eq!(positions, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_grouped_splits_runs_across_partitions() {
        let at = |partition, position| Offset::new(PartitionId::new("numbers", partition), position);
        let stream = ContextStream::from_envelopes(vec![
            Envelope::attach(1_u64, at(0, 0)),
            Envelope::attach(2, at(1, 0)),
            Envelope::attach(3, at(1, 1)),
            Envelope::attach(4, at(0, 1)),
        ]);

        let out = collect(stream.grouped(2).collapse()).await;
        assert_eq!(
            out,
            vec![
                (vec![1], at(0, 0)),
                (vec![2], at(1, 0)),
                (vec![3], at(1, 1)),
                (vec![4], at(0, 1)),
            ]
        );
    }

    #[tokio::test]
    async fn test_fold_grouped_collapse_with_first() {
        let out = collect(
            numbered(1..=4)
                .fold_grouped(4, || 0, |acc, v| acc + v)
                .collapse_with(|_| 0),
        )
        .await;
        assert_eq!(out, vec![(10, Offset::new(PartitionId::new("numbers", 0), 1))]);
    }

    #[tokio::test]
    async fn test_try_map_error_travels_in_band() {
        let items: Vec<Result<Envelope<u64>>> = numbered(1..=3)
            .try_map(|v| {
                if v == 2 {
                    Err(StreamletError::MalformedRecord { reason: "two".into() })
                } else {
                    Ok(v)
                }
            })
            .into_inner()
            .collect()
            .await;
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
        assert!(items[2].is_ok());
    }

    #[tokio::test]
    async fn test_map_async() {
        let out = collect(numbered(1..=2).map_async(|v| async move { v + 1 })).await;
        assert_eq!(out[1].0, 3);
    }

    #[tokio::test]
    async fn test_into_plain() {
        let values: Vec<u64> = numbered(1..=3)
            .into_plain()
            .into_inner()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![1, 2, 3]);
    }
}
