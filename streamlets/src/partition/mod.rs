//! Outlet partitioning.
//!
//! An outlet writes to a topic with a fixed number of partitions. Each
//! emitted value is routed by a [`Partitioner`], which picks either an
//! explicit partition index or a key that is hashed onto one.

mod partitioner;

pub use partitioner::{
    by_key, round_robin, KeyPartitioner, PartitionKey, Partitioner, PartitionerFactory,
    RoundRobinPartitioner,
};
