//! Values paired with the offset context they were read at.

use super::offset::{Offset, OffsetGroup};
use serde::{Deserialize, Serialize};

/// Bound shared by every value that travels through ports and topics.
pub trait Record: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Record for T {}

/// A value together with its commit context.
///
/// `C` is [`Offset`] for ordinary records and [`OffsetGroup`] after a
/// grouping. Only `Envelope<V, Offset>` can reach a committing sink, so an
/// unresolved group is rejected by the compiler rather than at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<V, C = Offset> {
    value: V,
    context: C,
}

impl<V> Envelope<V, Offset> {
    /// Attaches an offset to a value.
    #[must_use]
    pub fn attach(value: V, offset: Offset) -> Self {
        Self {
            value,
            context: offset,
        }
    }

    /// Returns the offset.
    #[must_use]
    pub fn offset(&self) -> &Offset {
        &self.context
    }
}

impl<V, C> Envelope<V, C> {
    /// Reassembles an envelope split by [`Envelope::into_parts`].
    pub(crate) fn from_parts(value: V, context: C) -> Self {
        Self { value, context }
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Returns the context.
    #[must_use]
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Applies `f` to the value; the context is carried over untouched.
    #[must_use]
    pub fn map<W, F>(self, f: F) -> Envelope<W, C>
    where
        F: FnOnce(V) -> W,
    {
        Envelope {
            value: f(self.value),
            context: self.context,
        }
    }

    /// Expands the value into many, each carrying a copy of the context.
    pub fn map_concat<W, I, F>(self, f: F) -> Vec<Envelope<W, C>>
    where
        C: Clone,
        I: IntoIterator<Item = W>,
        F: FnOnce(V) -> I,
    {
        let context = self.context;
        f(self.value)
            .into_iter()
            .map(|value| Envelope {
                value,
                context: context.clone(),
            })
            .collect()
    }

    /// Splits the envelope at the context boundary.
    #[must_use]
    pub fn into_parts(self) -> (V, C) {
        (self.value, self.context)
    }

    /// Drops the context. This is the only way out of context mode.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V> Envelope<V, OffsetGroup> {
    /// Resolves the group to its last offset.
    #[must_use]
    pub fn collapse(self) -> Envelope<V, Offset> {
        Envelope {
            value: self.value,
            context: self.context.collapse(),
        }
    }

    /// Resolves the group with a custom picker.
    #[must_use]
    pub fn collapse_with<P>(self, picker: P) -> Envelope<V, Offset>
    where
        P: FnOnce(&[Offset]) -> usize,
    {
        Envelope {
            value: self.value,
            context: self.context.collapse_with(picker),
        }
    }
}

/// Folds envelopes into one, replacing their offsets with an [`OffsetGroup`]
/// in arrival order.
///
/// Returns `None` for an empty input.
pub fn group<V, A, F>(
    envelopes: impl IntoIterator<Item = Envelope<V, Offset>>,
    init: A,
    mut fold: F,
) -> Option<Envelope<A, OffsetGroup>>
where
    F: FnMut(A, V) -> A,
{
    let mut acc = init;
    let mut offsets = Vec::new();
    for envelope in envelopes {
        let (value, offset) = envelope.into_parts();
        acc = fold(acc, value);
        offsets.push(offset);
    }
    OffsetGroup::from_offsets(offsets).map(|context| Envelope {
        value: acc,
        context,
    })
}

/// Splits envelopes into runs that each stay within one partition.
///
/// Runs come out in order of each partition's first appearance and keep
/// arrival order inside. Grouping a run is then safe to collapse: its last
/// offset covers every other offset in it.
pub fn split_by_partition<V>(
    envelopes: impl IntoIterator<Item = Envelope<V, Offset>>,
) -> Vec<Vec<Envelope<V, Offset>>> {
    let mut runs: Vec<Vec<Envelope<V, Offset>>> = Vec::new();
    for envelope in envelopes {
        let partition = envelope.offset().partition();
        let slot = runs
            .iter()
            .position(|run| run.first().is_some_and(|first| first.offset().partition() == partition));
        match slot {
            Some(index) => runs[index].push(envelope),
            None => runs.push(vec![envelope]),
        }
    }
    runs
}
