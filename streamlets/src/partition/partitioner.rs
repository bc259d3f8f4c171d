//! Routing of outlet values onto topic partitions.

use md5::{Digest, Md5};
use std::fmt;
use std::sync::Arc;

/// Where a value should be written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    /// An explicit partition index, taken modulo the partition count.
    Index(u32),
    /// A key; equal keys always land on the same partition.
    Key(String),
}

impl PartitionKey {
    /// Resolves the key to a partition index in `0..partitions`.
    #[must_use]
    pub fn resolve(&self, partitions: u32) -> u32 {
        let partitions = partitions.max(1);
        match self {
            Self::Index(index) => index % partitions,
            Self::Key(key) => {
                let digest = Md5::digest(key.as_bytes());
                let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
                hash % partitions
            }
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Key(key) => write!(f, "key:{key}"),
        }
    }
}

/// Chooses a partition for each value written to an outlet.
///
/// A partitioner instance is owned by a single writer, so it may keep
/// mutable routing state.
pub trait Partitioner<T>: Send {
    /// Returns the routing key for `value`.
    fn route(&mut self, value: &T) -> PartitionKey;
}

/// Builds a partitioner for an outlet with the given partition count.
pub type PartitionerFactory<T> = Arc<dyn Fn(u32) -> Box<dyn Partitioner<T>> + Send + Sync>;

/// Cycles through partitions in order.
#[derive(Debug, Clone)]
pub struct RoundRobinPartitioner {
    partitions: u32,
    next: u32,
}

impl RoundRobinPartitioner {
    /// Creates a round-robin partitioner over `partitions` partitions.
    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            next: 0,
        }
    }
}

impl<T> Partitioner<T> for RoundRobinPartitioner {
    fn route(&mut self, _value: &T) -> PartitionKey {
        let index = self.next;
        self.next = (self.next + 1) % self.partitions;
        PartitionKey::Index(index)
    }
}

/// Routes by a key extracted from each value.
pub struct KeyPartitioner<T> {
    key_fn: Arc<dyn Fn(&T) -> String + Send + Sync>,
}

impl<T> KeyPartitioner<T> {
    /// Creates a key partitioner.
    pub fn new<F>(key_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            key_fn: Arc::new(key_fn),
        }
    }
}

impl<T> fmt::Debug for KeyPartitioner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPartitioner").finish_non_exhaustive()
    }
}

impl<T> Partitioner<T> for KeyPartitioner<T> {
    fn route(&mut self, value: &T) -> PartitionKey {
        PartitionKey::Key((self.key_fn)(value))
    }
}

/// The default factory: round-robin over the outlet's partitions.
#[must_use]
pub fn round_robin<T: 'static>() -> PartitionerFactory<T> {
    Arc::new(|partitions| Box::new(RoundRobinPartitioner::new(partitions)) as Box<dyn Partitioner<T>>)
}

/// A factory routing each value by `key_fn`.
pub fn by_key<T, F>(key_fn: F) -> PartitionerFactory<T>
where
    T: 'static,
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    let key_fn: Arc<dyn Fn(&T) -> String + Send + Sync> = Arc::new(key_fn);
    Arc::new(move |_| {
        Box::new(KeyPartitioner {
            key_fn: Arc::clone(&key_fn),
        }) as Box<dyn Partitioner<T>>
    })
}
