//! Runnable graphs.

use crate::errors::Result;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;

/// A fully wired stream, ready to run.
///
/// Built once per streamlet start; running consumes it.
pub struct RunnableGraph {
    future: BoxFuture<'static, Result<()>>,
}

impl RunnableGraph {
    /// Wraps a future that drives one or more streams to completion.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            future: future.boxed(),
        }
    }

    /// Runs several graphs concurrently. The merged graph fails as soon as
    /// any part fails.
    pub fn merge(graphs: impl IntoIterator<Item = RunnableGraph>) -> Self {
        let futures: Vec<_> = graphs.into_iter().map(|g| g.future).collect();
        Self::new(async move {
            try_join_all(futures).await?;
            Ok(())
        })
    }

    /// Runs the graph until its streams complete or fail.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a stream, sink or committer.
    pub async fn run(self) -> Result<()> {
        self.future.await
    }
}

impl fmt::Debug for RunnableGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableGraph").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamletError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_merge_runs_all() {
        let counter = Arc::new(AtomicUsize::new(0));
        let graphs = (0..3).map(|_| {
            let counter = Arc::clone(&counter);
            RunnableGraph::new(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        RunnableGraph::merge(graphs).run().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_merge_fails_fast() {
        let graphs = vec![
            RunnableGraph::new(async { Ok(()) }),
            RunnableGraph::new(async { Err(StreamletError::Internal("boom".into())) }),
        ];
        let err = RunnableGraph::merge(graphs).run().await.unwrap_err();
        assert!(matches!(err, StreamletError::Internal(_)));
    }
}
