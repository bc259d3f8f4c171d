//! Stateful micro-batch aggregation over context streams.

use super::context::ContextStream;
use crate::config::OutputMode;
use crate::core::{group, split_by_partition, Envelope, Offset};
use crate::errors::{Result, StreamletError};
use crate::state::StateStore;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One keyed row of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRow<A> {
    /// Grouping key.
    pub key: String,
    /// Aggregate value after the batch.
    pub value: A,
}

impl<A> AggregateRow<A> {
    /// Creates a row.
    #[must_use]
    pub fn new(key: impl Into<String>, value: A) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

fn fold_batch<T, A, K, F>(
    store: &StateStore,
    mode: OutputMode,
    values: Vec<T>,
    key_fn: &mut K,
    fold: &mut F,
) -> Result<Vec<AggregateRow<A>>>
where
    A: Serialize + DeserializeOwned,
    K: FnMut(&T) -> String,
    F: FnMut(Option<A>, T) -> A,
{
    let mut touched: Vec<String> = Vec::new();
    let mut created: HashSet<String> = HashSet::new();

    for value in values {
        let key = key_fn(&value);
        let previous: Option<A> = store.get(&key)?;
        if previous.is_none() {
            created.insert(key.clone());
        }
        let next = fold(previous, value);
        store.put(&key, &next)?;
        if !touched.contains(&key) {
            touched.push(key);
        }
    }

    let rows = match mode {
        OutputMode::Complete => store
            .entries::<A>()?
            .into_iter()
            .map(|(key, value)| AggregateRow { key, value })
            .collect(),
        OutputMode::Update | OutputMode::Append => {
            let mut rows = Vec::with_capacity(touched.len());
            for key in touched {
                if mode == OutputMode::Append && !created.contains(&key) {
                    continue;
                }
                let value = store
                    .get::<A>(&key)?
                    .ok_or_else(|| StreamletError::StateStore(format!("key '{key}' vanished")))?;
                rows.push(AggregateRow { key, value });
            }
            rows
        }
    };
    Ok(rows)
}

impl<T: Send + 'static> ContextStream<T, Offset> {
    /// Aggregates values by key in micro-batches of `batch_size`.
    ///
    /// Each batch folds its values into `store` and emits one element per
    /// partition present in it: the rows selected by `mode`, carrying that
    /// partition's last offset in the batch. Under
    /// [`OutputMode::Append`] a key is emitted only in the batch that created
    /// it; [`OutputMode::Update`] emits every key the batch touched;
    /// [`OutputMode::Complete`] emits the whole aggregate, sorted by key.
    #[must_use]
    pub fn aggregate<A, K, F>(
        self,
        store: Arc<StateStore>,
        batch_size: usize,
        mode: OutputMode,
        mut key_fn: K,
        mut fold: F,
    ) -> ContextStream<Vec<AggregateRow<A>>, Offset>
    where
        A: Serialize + DeserializeOwned + Send + 'static,
        K: FnMut(&T) -> String + Send + 'static,
        F: FnMut(Option<A>, T) -> A + Send + 'static,
    {
        let batches = self
            .into_inner()
            .chunks(batch_size.max(1))
            .flat_map(move |chunk| {
                let emitted = match chunk.into_iter().collect::<Result<Vec<_>>>() {
                    Ok(envelopes) => split_by_partition(envelopes)
                        .into_iter()
                        .map(|run| -> Result<Envelope<Vec<AggregateRow<A>>>> {
                            let (values, offset) = group(run, Vec::new(), |mut acc, value| {
                                acc.push(value);
                                acc
                            })
                            .ok_or_else(|| StreamletError::Internal("empty batch".to_string()))?
                            .collapse()
                            .into_parts();
                            let rows = fold_batch(&store, mode, values, &mut key_fn, &mut fold)?;
                            Ok(Envelope::from_parts(rows, offset))
                        })
                        .collect::<Vec<_>>(),
                    Err(err) => vec![Err(err)],
                };
                stream::iter(emitted)
            })
            .boxed();
        ContextStream::from_results(batches)
    }
}
