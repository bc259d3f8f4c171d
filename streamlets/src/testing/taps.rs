//! In-memory stand-ins for a streamlet's upstream and downstream topics.

use crate::config::{OutputMode, ResetPosition};
use crate::core::{PartitionId, Record};
use crate::log::{AnyTopic, Topic};
use crate::shape::{Inlet, Outlet, PortSpec};
use std::fmt;
use std::sync::Arc;

/// Something the harness can bind to an inlet.
pub trait InletBinding: Send + Sync {
    /// The inlet this binding feeds.
    fn port(&self) -> &PortSpec;
    /// The topic replayed into the inlet.
    fn topic(&self) -> Arc<dyn AnyTopic>;
    /// Where reading starts when the harness group has no commit.
    fn reset(&self) -> ResetPosition;
}

/// Something the harness can bind to an outlet.
pub trait OutletBinding: Send + Sync {
    /// The outlet this binding captures.
    fn port(&self) -> &PortSpec;
    /// The topic the outlet writes.
    fn topic(&self) -> Arc<dyn AnyTopic>;
}

/// A bounded, replayable source for one inlet.
///
/// Values added with [`add_data`](Self::add_data) are read through the same
/// topic source a running pipeline uses, up to the data present when the
/// run starts.
pub struct InletTap<T> {
    spec: PortSpec,
    topic: Arc<Topic<T>>,
    reset: ResetPosition,
}

impl<T: Record> InletTap<T> {
    /// Creates an empty single-partition tap for `inlet`, read from the
    /// earliest position.
    #[must_use]
    pub fn new(inlet: &Inlet<T>) -> Self {
        Self {
            spec: inlet.spec(),
            topic: Arc::new(Topic::new(Self::topic_name(inlet.name()), 1)),
            reset: ResetPosition::Earliest,
        }
    }

    fn topic_name(port: &str) -> String {
        format!("inlet-tap.{port}")
    }

    fn rebuild(&mut self, partitions: u32, start: u64) {
        self.topic = Arc::new(Topic::new(Self::topic_name(&self.spec.name), partitions).with_start_position(start));
    }

    /// Sets the position of the first record in each partition. Discards
    /// data added so far.
    #[must_use]
    pub fn with_start_position(mut self, position: u64) -> Self {
        self.rebuild(self.topic.partition_count(), position);
        self
    }

    /// Sets the partition count. Discards data added so far.
    #[must_use]
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.rebuild(partitions, self.topic.start_position(0));
        self
    }

    /// Sets where reading starts without a commit.
    #[must_use]
    pub fn with_reset_position(mut self, reset: ResetPosition) -> Self {
        self.reset = reset;
        self
    }

    /// Appends `values` to partition 0.
    pub fn add_data(&self, values: impl IntoIterator<Item = T>) {
        self.add_data_to(0, values);
    }

    /// Appends `values` to `partition`.
    pub fn add_data_to(&self, partition: u32, values: impl IntoIterator<Item = T>) {
        for value in values {
            self.topic.append(partition, value);
        }
    }

    /// The identity of one of the tap's partitions, as offsets name it.
    #[must_use]
    pub fn partition(&self, index: u32) -> PartitionId {
        self.topic.partition_id(index)
    }

    /// Number of values added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topic.len()
    }

    /// Returns true if no values were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topic.is_empty()
    }
}

impl<T: Record> InletBinding for InletTap<T> {
    fn port(&self) -> &PortSpec {
        &self.spec
    }

    fn topic(&self) -> Arc<dyn AnyTopic> {
        Arc::clone(&self.topic) as Arc<dyn AnyTopic>
    }

    fn reset(&self) -> ResetPosition {
        self.reset
    }
}

impl<T> fmt::Debug for InletTap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InletTap")
            .field("port", &self.spec.name)
            .field("reset", &self.reset)
            .finish_non_exhaustive()
    }
}

/// Captures everything a streamlet writes to one outlet.
pub struct OutletTap<T> {
    spec: PortSpec,
    topic: Arc<Topic<T>>,
    mode: OutputMode,
}

impl<T: Record> OutletTap<T> {
    /// Creates a tap for `outlet` with the same partition count, capturing
    /// in [`OutputMode::Append`].
    #[must_use]
    pub fn new(outlet: &Outlet<T>) -> Self {
        Self {
            spec: outlet.spec(),
            topic: Arc::new(Topic::new(format!("outlet-tap.{}", outlet.name()), outlet.partitions())),
            mode: OutputMode::Append,
        }
    }

    /// Records which output mode the streamlet under test writes with.
    #[must_use]
    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// The capture mode.
    #[must_use]
    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// Snapshot of every captured row, partition by partition, in write
    /// order.
    ///
    /// Rows are never filtered or replaced, whatever the output mode: under
    /// [`OutputMode::Append`] the streamlet only writes new rows, and under
    /// [`OutputMode::Update`] or [`OutputMode::Complete`] each micro-batch's
    /// rows are kept alongside the earlier ones.
    #[must_use]
    pub fn as_collection(&self) -> Vec<T> {
        self.topic.values()
    }

    /// Values written to one partition, in order.
    #[must_use]
    pub fn partition_values(&self, partition: u32) -> Vec<T> {
        self.topic.partition_values(partition)
    }
}


impl<T: Record> OutletBinding for OutletTap<T> {
    fn port(&self) -> &PortSpec {
        &self.spec
    }

    fn topic(&self) -> Arc<dyn AnyTopic> {
        Arc::clone(&self.topic) as Arc<dyn AnyTopic>
    }
}

impl<T> fmt::Debug for OutletTap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutletTap")
            .field("port", &self.spec.name)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inlet_tap_positions() {
        let tap = InletTap::new(&Inlet::<u64>::new("in")).with_start_position(1);
        tap.add_data(1..=3);
        assert_eq!(tap.len(), 3);
        let topic = InletBinding::topic(&tap);
        assert_eq!(topic.name(), "inlet-tap.in");
        assert_eq!(tap.reset(), ResetPosition::Earliest);
        assert_eq!(tap.partition(0), PartitionId::new("inlet-tap.in", 0));
    }

    #[test]
    fn test_with_partitions_keeps_start() {
        let tap = InletTap::new(&Inlet::<u64>::new("in"))
            .with_start_position(5)
            .with_partitions(3);
        tap.add_data_to(2, [7]);
        assert_eq!(InletBinding::topic(&tap).partition_count(), 3);
        assert_eq!(tap.len(), 1);
    }

    #[test]
    fn test_outlet_tap_keeps_equal_rows_in_every_mode() {
        let outlet = Outlet::<String>::new("out");
        let append = OutletTap::new(&outlet);
        let update = OutletTap::new(&outlet).with_output_mode(OutputMode::Update);
        assert_eq!(append.output_mode(), OutputMode::Append);
        for tap in [&append, &update] {
            for v in ["a", "b", "a"] {
                tap.topic.append(0, v.to_string());
            }
        }
        assert_eq!(append.as_collection(), vec!["a", "b", "a"]);
        assert_eq!(update.as_collection(), vec!["a", "b", "a"]);
        assert_eq!(append.partition_values(0).len(), 3);
    }
}
