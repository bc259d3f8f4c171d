//! Log positions and offset groups.

use crate::errors::InvalidComparisonError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifies one partition of one topic in the external log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    topic: String,
    index: u32,
}

impl PartitionId {
    /// Creates a new partition id.
    #[must_use]
    pub fn new(topic: impl Into<String>, index: u32) -> Self {
        Self {
            topic: topic.into(),
            index,
        }
    }

    /// Returns the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the partition index within the topic.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.index)
    }
}

/// A position in one partition of the external log.
///
/// Offsets are only ordered within a partition. There is deliberately no
/// `PartialOrd` impl; use [`Offset::try_cmp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    partition: PartitionId,
    position: u64,
}

impl Offset {
    /// Creates a new offset.
    #[must_use]
    pub fn new(partition: PartitionId, position: u64) -> Self {
        Self {
            partition,
            position,
        }
    }

    /// Returns the partition.
    #[must_use]
    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Returns the position within the partition.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Compares two offsets of the same partition.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidComparisonError`] when the partitions differ.
    pub fn try_cmp(&self, other: &Self) -> Result<Ordering, InvalidComparisonError> {
        if self.partition != other.partition {
            return Err(InvalidComparisonError::new(
                self.partition.clone(),
                other.partition.clone(),
            ));
        }
        Ok(self.position.cmp(&other.position))
    }

    /// Returns true if this offset lies strictly after `other`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidComparisonError`] when the partitions differ.
    pub fn is_after(&self, other: &Self) -> Result<bool, InvalidComparisonError> {
        Ok(self.try_cmp(other)? == Ordering::Greater)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.position)
    }
}

/// The offsets folded into one record by a grouping operation.
///
/// Always non-empty and kept in arrival order. A group has to be collapsed to
/// a single [`Offset`] before it can be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOffsetGroup")]
pub struct OffsetGroup {
    offsets: Vec<Offset>,
}

#[derive(Deserialize)]
struct RawOffsetGroup {
    offsets: Vec<Offset>,
}

impl TryFrom<RawOffsetGroup> for OffsetGroup {
    type Error = &'static str;

    fn try_from(raw: RawOffsetGroup) -> Result<Self, Self::Error> {
        Self::from_offsets(raw.offsets).ok_or("an offset group needs at least one offset")
    }
}

impl OffsetGroup {
    /// Builds a group from offsets in arrival order. Returns `None` when empty.
    #[must_use]
    pub fn from_offsets(offsets: Vec<Offset>) -> Option<Self> {
        if offsets.is_empty() {
            None
        } else {
            Some(Self { offsets })
        }
    }

    /// Returns the grouped offsets in arrival order.
    #[must_use]
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    /// Returns the number of offsets in the group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Always false; groups are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Resolves the group to its last offset.
    ///
    /// Log positions are monotonic per partition, so committing the last
    /// offset implies every earlier one.
    #[must_use]
    pub fn collapse(self) -> Offset {
        self.collapse_with(|offsets| offsets.len() - 1)
    }

    /// Resolves the group with a custom picker returning the index to keep.
    ///
    /// Out-of-range indices fall back to the last offset.
    #[must_use]
    pub fn collapse_with<P>(mut self, picker: P) -> Offset
    where
        P: FnOnce(&[Offset]) -> usize,
    {
        let last = self.offsets.len() - 1;
        let index = picker(&self.offsets).min(last);
        self.offsets.swap_remove(index)
    }

    /// Returns the highest offset of `partition` in the group, if any.
    #[must_use]
    pub fn max_position(&self, partition: &PartitionId) -> Option<u64> {
        self.offsets
            .iter()
            .filter(|o| o.partition() == partition)
            .map(Offset::position)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p0(position: u64) -> Offset {
        Offset::new(PartitionId::new("numbers", 0), position)
    }

    #[test]
    fn test_offsets_compare_within_partition() {
        assert_eq!(p0(1).try_cmp(&p0(2)).unwrap(), Ordering::Less);
        assert_eq!(p0(2).try_cmp(&p0(2)).unwrap(), Ordering::Equal);
        assert!(p0(3).is_after(&p0(2)).unwrap());
    }

    #[test]
    fn test_cross_partition_comparison_fails() {
        let other = Offset::new(PartitionId::new("numbers", 1), 1);
        let err = p0(1).try_cmp(&other).unwrap_err();
        assert_eq!(err.left.index(), 0);
        assert_eq!(err.right.index(), 1);

        let other_topic = Offset::new(PartitionId::new("words", 0), 1);
        assert!(p0(1).is_after(&other_topic).is_err());
    }

    #[test]
    fn test_empty_group_is_rejected() {
        assert!(OffsetGroup::from_offsets(Vec::new()).is_none());
    }

    #[test]
    fn test_deserialize_checks_group_is_non_empty() {
        let err = serde_json::from_str::<OffsetGroup>(r#"{"offsets":[]}"#).unwrap_err();
        assert!(err.to_string().contains("at least one offset"));

        let group = OffsetGroup::from_offsets(vec![p0(3), p0(4)]).unwrap();
        let json = serde_json::to_string(&group).unwrap();
        let back: OffsetGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back.collapse(), p0(4));
    }

    #[test]
    fn test_collapse_takes_last() {
        let group = OffsetGroup::from_offsets((1..=5).map(p0).collect()).unwrap();
        assert_eq!(group.len(), 5);
        assert_eq!(group.max_position(&PartitionId::new("numbers", 0)), Some(5));
        assert_eq!(group.collapse(), p0(5));
    }

    #[test]
    fn test_collapse_with_picker() {
        let group = OffsetGroup::from_offsets(vec![p0(4), p0(7), p0(9)]).unwrap();
        assert_eq!(group.clone().collapse_with(|_| 0), p0(4));
        assert_eq!(group.collapse_with(|_| 42), p0(9));
    }

    #[test]
    fn test_display() {
        assert_eq!(p0(7).to_string(), "numbers-0@7");
    }
}
