//! Partitioned, append-only in-memory topics.

use crate::core::{Envelope, Offset, PartitionId, Record};
use crate::errors::ShapeMismatchError;
use crate::partition::PartitionKey;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Type-erased view of a [`Topic`], used for wiring and commits.
pub trait AnyTopic: Send + Sync + fmt::Debug {
    /// Topic name.
    fn name(&self) -> &str;
    /// Number of partitions.
    fn partition_count(&self) -> u32;
    /// Name of the record type, for diagnostics.
    fn record_type(&self) -> &'static str;
    /// Identity of the record type.
    fn record_type_id(&self) -> TypeId;
    /// Persists a consumer group's committed position. Commits never move
    /// a position backwards.
    fn commit(&self, group: &str, partition: u32, position: u64) -> bool;
    /// A consumer group's committed position.
    fn committed(&self, group: &str, partition: u32) -> Option<u64>;
    /// Upcasts for downcasting to the typed topic.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Downcasts an erased topic to its record type.
///
/// # Errors
///
/// Returns [`ShapeMismatchError::type_mismatch`] if the topic carries
/// another type.
pub fn downcast_topic<T: Record>(
    topic: Arc<dyn AnyTopic>,
    port: &str,
) -> Result<Arc<Topic<T>>, ShapeMismatchError> {
    let found = topic.record_type();
    topic
        .as_any()
        .downcast::<Topic<T>>()
        .map_err(|_| ShapeMismatchError::type_mismatch(port, std::any::type_name::<T>(), found))
}

#[derive(Debug)]
struct PartitionLog<T> {
    start: u64,
    records: Vec<T>,
}

impl<T> PartitionLog<T> {
    fn end(&self) -> u64 {
        self.start + self.records.len() as u64
    }
}

/// An append-only topic with a fixed number of partitions.
///
/// Positions in a partition are dense and increase by one per record.
/// Committed positions are kept per consumer group, next to the data,
/// so they outlive the consumers that wrote them.
pub struct Topic<T> {
    name: String,
    partitions: Vec<RwLock<PartitionLog<T>>>,
    committed: DashMap<(String, u32), u64>,
    appended: Notify,
}

impl<T: Record> Topic<T> {
    /// Creates an empty topic whose partitions start at position 0.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: u32) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| {
                RwLock::new(PartitionLog {
                    start: 0,
                    records: Vec::new(),
                })
            })
            .collect();
        Self {
            name: name.into(),
            partitions,
            committed: DashMap::new(),
            appended: Notify::new(),
        }
    }

    /// Sets the position of the first record of every empty partition.
    #[must_use]
    pub fn with_start_position(self, position: u64) -> Self {
        for partition in &self.partitions {
            let mut log = partition.write();
            if log.records.is_empty() {
                log.start = position;
            }
        }
        self
    }

    /// Creates an empty topic behind an erased handle.
    pub fn create_erased(name: &str, partitions: u32) -> Arc<dyn AnyTopic> {
        Arc::new(Self::new(name, partitions))
    }

    /// Gets the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> u32 {
        u32::try_from(self.partitions.len()).unwrap_or(u32::MAX)
    }

    /// Identifies one partition of this topic.
    #[must_use]
    pub fn partition_id(&self, partition: u32) -> PartitionId {
        PartitionId::new(self.name.clone(), partition)
    }

    fn partition(&self, partition: u32) -> &RwLock<PartitionLog<T>> {
        let index = partition as usize % self.partitions.len();
        &self.partitions[index]
    }

    /// Appends a value to a partition and returns its offset.
    pub fn append(&self, partition: u32, value: T) -> Offset {
        let partition = partition % self.partition_count();
        let position = {
            let mut log = self.partition(partition).write();
            let position = log.end();
            log.records.push(value);
            position
        };
        self.appended.notify_waiters();
        Offset::new(self.partition_id(partition), position)
    }

    /// Appends a value to the partition `key` resolves to.
    pub fn append_routed(&self, key: &PartitionKey, value: T) -> Offset {
        self.append(key.resolve(self.partition_count()), value)
    }

    /// Reads up to `max` records of a partition, starting at `from`.
    #[must_use]
    pub fn read(&self, partition: u32, from: u64, max: usize) -> Vec<Envelope<T>> {
        let id = self.partition_id(partition);
        let log = self.partition(partition).read();
        let from = from.max(log.start);
        let skip = usize::try_from(from - log.start).unwrap_or(usize::MAX);
        log.records
            .iter()
            .skip(skip)
            .take(max)
            .zip(from..)
            .map(|(value, position)| Envelope::attach(value.clone(), Offset::new(id.clone(), position)))
            .collect()
    }

    /// The first retained position of a partition.
    #[must_use]
    pub fn start_position(&self, partition: u32) -> u64 {
        self.partition(partition).read().start
    }

    /// The position the next appended record of a partition will get.
    #[must_use]
    pub fn end_position(&self, partition: u32) -> u64 {
        self.partition(partition).read().end()
    }

    /// Number of records across all partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.read().records.len()).sum()
    }

    /// Returns true if no partition holds a record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, partition by partition, in position order.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.partitions
            .iter()
            .flat_map(|p| p.read().records.clone())
            .collect()
    }

    /// Every record of one partition, in position order.
    #[must_use]
    pub fn partition_values(&self, partition: u32) -> Vec<T> {
        self.partition(partition).read().records.clone()
    }

    /// A future resolving on the next append.
    ///
    /// Create it before checking for data so that an append racing with
    /// the check is not missed.
    pub fn appended(&self) -> Notified<'_> {
        self.appended.notified()
    }
}

impl<T: Record> AnyTopic for Topic<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn partition_count(&self) -> u32 {
        Topic::partition_count(self)
    }

    fn record_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn record_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn commit(&self, group: &str, partition: u32, position: u64) -> bool {
        if partition >= self.partition_count() {
            return false;
        }
        self.committed
            .entry((group.to_string(), partition))
            .and_modify(|current| *current = (*current).max(position))
            .or_insert(position);
        true
    }

    fn committed(&self, group: &str, partition: u32) -> Option<u64> {
        self.committed
            .get(&(group.to_string(), partition))
            .map(|entry| *entry.value())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .field("type", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}
