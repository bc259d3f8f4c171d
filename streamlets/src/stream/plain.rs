//! Streams without offset context.

use super::graph::RunnableGraph;
use super::sink::{drive_plain, PlainSink};
use crate::errors::Result;
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// A stream of bare values.
///
/// Used by sources that generate data themselves and by consumers that
/// accept at-most-once delivery: nothing read through a plain stream is
/// ever committed.
pub struct PlainStream<T> {
    inner: BoxStream<'static, Result<T>>,
}

impl<T> std::fmt::Debug for PlainStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainStream")
            .field("value", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PlainStream<T> {
    /// Wraps a stream of values.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            inner: stream.map(Ok).boxed(),
        }
    }

    /// Wraps a finite sequence of values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(values))
    }

    pub(crate) fn from_results(inner: BoxStream<'static, Result<T>>) -> Self {
        Self { inner }
    }

    /// Transforms each value.
    #[must_use]
    pub fn map<U, F>(self, mut f: F) -> PlainStream<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        PlainStream {
            inner: self.inner.map(move |item| item.map(&mut f)).boxed(),
        }
    }

    /// Keeps values matching `predicate`.
    #[must_use]
    pub fn filter<F>(self, mut predicate: F) -> Self
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        Self {
            inner: self
                .inner
                .filter(move |item| future::ready(item.as_ref().map_or(true, &mut predicate)))
                .boxed(),
        }
    }

    /// Expands each value into many.
    #[must_use]
    pub fn map_concat<U, I, F>(self, mut f: F) -> PlainStream<U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: FnMut(T) -> I + Send + 'static,
    {
        PlainStream {
            inner: self
                .inner
                .flat_map(move |item| {
                    let expanded: Vec<Result<U>> = match item {
                        Ok(value) => f(value).into_iter().map(Ok).collect(),
                        Err(err) => vec![Err(err)],
                    };
                    stream::iter(expanded)
                })
                .boxed(),
        }
    }

    /// Runs the stream into a sink.
    #[must_use]
    pub fn to(self, sink: PlainSink<T>) -> RunnableGraph {
        RunnableGraph::new(drive_plain(self.inner, sink))
    }

    /// Unwraps the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> BoxStream<'static, Result<T>> {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_operators() {
        let values: Vec<String> = PlainStream::from_values(1..=6_u32)
            .filter(|v| v % 3 == 0)
            .map_concat(|v| vec![v, v])
            .map(|v| v.to_string())
            .into_inner()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec!["3", "3", "6", "6"]);
    }
}
