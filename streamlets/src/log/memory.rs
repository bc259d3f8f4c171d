//! Registry of topics standing in for an external log.

use super::topic::{downcast_topic, AnyTopic, Topic};
use crate::commit::CommitLog;
use crate::core::{PartitionId, Record};
use crate::errors::{CommitFailureError, Result, ShapeMismatchError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// A set of named topics shared by every streamlet of a pipeline.
///
/// Cloning yields another handle to the same topics.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLog {
    topics: Arc<DashMap<String, Arc<dyn AnyTopic>>>,
}

impl InMemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a topic, replacing any topic of the same name.
    pub fn register(&self, topic: Arc<dyn AnyTopic>) {
        self.topics.insert(topic.name().to_string(), topic);
    }

    /// Returns the topic `name`, creating it with `partitions` partitions if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a type mismatch if the existing topic carries another type.
    pub fn create_topic<T: Record>(&self, name: &str, partitions: u32) -> Result<Arc<Topic<T>>> {
        let erased = self
            .topics
            .entry(name.to_string())
            .or_insert_with(|| Topic::<T>::create_erased(name, partitions))
            .clone();
        Ok(downcast_topic(erased, name)?)
    }

    /// Looks up a topic without its type.
    #[must_use]
    pub fn topic_erased(&self, name: &str) -> Option<Arc<dyn AnyTopic>> {
        self.topics.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Looks up a typed topic.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] if the topic is missing or carries
    /// another type.
    pub fn topic<T: Record>(&self, name: &str) -> Result<Arc<Topic<T>>> {
        let erased = self
            .topic_erased(name)
            .ok_or_else(|| ShapeMismatchError::unknown_port("log", name))?;
        Ok(downcast_topic(erased, name)?)
    }

    /// Names of all topics, sorted.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// A consumer group's committed position on a topic partition.
    #[must_use]
    pub fn committed(&self, group: &str, partition: &PartitionId) -> Option<u64> {
        self.topic_erased(partition.topic())
            .and_then(|topic| topic.committed(group, partition.index()))
    }

    /// A commit log writing positions for `group`.
    #[must_use]
    pub fn commit_log(&self, group: impl Into<String>) -> GroupCommitLog {
        GroupCommitLog {
            log: self.clone(),
            group: group.into(),
        }
    }
}

/// Commits positions of one consumer group into an [`InMemoryLog`].
#[derive(Debug, Clone)]
pub struct GroupCommitLog {
    log: InMemoryLog,
    group: String,
}

impl GroupCommitLog {
    /// Gets the consumer group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }
}

#[async_trait]
impl CommitLog for GroupCommitLog {
    async fn commit(&self, partition: &PartitionId, position: u64) -> Result<(), CommitFailureError> {
        let topic = self.log.topic_erased(partition.topic()).ok_or_else(|| {
            CommitFailureError::new(partition.clone(), position, "unknown topic")
        })?;
        if topic.commit(&self.group, partition.index(), position) {
            trace!(group = %self.group, partition = %partition, position, "Committed");
            Ok(())
        } else {
            Err(CommitFailureError::new(
                partition.clone(),
                position,
                "partition out of range",
            ))
        }
    }
}
