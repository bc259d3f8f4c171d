//! Typed inlet and outlet declarations.

use crate::core::Record;
use crate::log::{AnyTopic, Topic};
use crate::partition::{by_key, round_robin, Partitioner, PartitionerFactory};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Creates an empty topic for an outlet's record type.
pub type TopicFactory = fn(&str, u32) -> Arc<dyn AnyTopic>;

/// A named, typed input port.
pub struct Inlet<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> Inlet<T> {
    /// Declares an inlet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }

    /// Gets the port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Describes the port for shape validation.
    #[must_use]
    pub fn spec(&self) -> PortSpec {
        PortSpec {
            name: self.name.clone(),
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            partitions: None,
            topic_factory: None,
        }
    }
}

impl<T> Clone for Inlet<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Inlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inlet")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// A named, typed output port with a partitioning policy.
pub struct Outlet<T> {
    name: String,
    partitions: u32,
    partitioner: PartitionerFactory<T>,
}

impl<T: Record> Outlet<T> {
    /// Declares a single-partition, round-robin outlet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            partitioner: round_robin(),
        }
    }

    /// Sets the partition count of the outlet's topic.
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Sets a custom partitioner factory.
    #[must_use]
    pub fn with_partitioner(mut self, factory: PartitionerFactory<T>) -> Self {
        self.partitioner = factory;
        self
    }

    /// Routes values by a key extracted from each value.
    #[must_use]
    pub fn partitioned_by<F>(self, key_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.with_partitioner(by_key(key_fn))
    }

    /// Gets the port name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the partition count.
    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Creates a partitioner for one writer.
    #[must_use]
    pub fn create_partitioner(&self) -> Box<dyn Partitioner<T>> {
        (self.partitioner)(self.partitions)
    }

    /// Describes the port for shape validation.
    #[must_use]
    pub fn spec(&self) -> PortSpec {
        PortSpec {
            name: self.name.clone(),
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            partitions: Some(self.partitions),
            topic_factory: Some(Topic::<T>::create_erased),
        }
    }
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            partitions: self.partitions,
            partitioner: Arc::clone(&self.partitioner),
        }
    }
}

impl<T> fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outlet")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .field("partitions", &self.partitions)
            .finish_non_exhaustive()
    }
}

/// Type-erased description of a declared port.
#[derive(Clone)]
pub struct PortSpec {
    /// Port name.
    pub name: String,
    /// Name of the record type, for diagnostics.
    pub type_name: &'static str,
    /// Identity of the record type.
    pub type_id: TypeId,
    /// Partition count; outlets only.
    pub partitions: Option<u32>,
    /// Topic constructor; outlets only.
    pub topic_factory: Option<TopicFactory>,
}

impl PortSpec {
    /// Returns true if this port carries values of type `T`.
    #[must_use]
    pub fn carries<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Creates the backing topic of an outlet.
    #[must_use]
    pub fn create_topic(&self, topic_name: &str) -> Option<Arc<dyn AnyTopic>> {
        self.topic_factory
            .map(|factory| factory(topic_name, self.partitions.unwrap_or(1)))
    }
}

impl fmt::Debug for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSpec")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("partitions", &self.partitions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inlet_spec() {
        let inlet = Inlet::<u64>::new("in");
        let spec = inlet.spec();
        assert_eq!(spec.name, "in");
        assert!(spec.carries::<u64>());
        assert!(!spec.carries::<String>());
        assert!(spec.create_topic("x").is_none());
    }

    #[test]
    fn test_outlet_spec_creates_topic() {
        let outlet = Outlet::<String>::new("out").with_partitions(4);
        let spec = outlet.spec();
        assert_eq!(spec.partitions, Some(4));

        let topic = spec.create_topic("ingest.out").unwrap();
        assert_eq!(topic.name(), "ingest.out");
        assert_eq!(topic.partition_count(), 4);
        assert_eq!(topic.record_type_id(), TypeId::of::<String>());
    }

    #[test]
    fn test_partitioned_outlet_routes_by_key() {
        let outlet = Outlet::<String>::new("out")
            .with_partitions(16)
            .partitioned_by(|s| s.clone());
        let mut partitioner = outlet.create_partitioner();
        let a = partitioner.route(&"k".to_string()).resolve(16);
        let b = partitioner.route(&"k".to_string()).resolve(16);
        assert_eq!(a, b);
    }
}
