//! In-memory partitioned log.
//!
//! Topics hold the records exchanged between streamlets together with the
//! committed positions of every consumer group. They play the role of the
//! external durable log: they outlive streamlet restarts.

mod memory;
mod topic;

pub use memory::{GroupCommitLog, InMemoryLog};
pub use topic::{downcast_topic, AnyTopic, Topic};
