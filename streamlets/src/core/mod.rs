//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the runtime:
//! - Partitions, offsets and offset groups
//! - The envelope pairing a value with its offset context
//! - Stage kind and delivery mode enums

mod envelope;
mod offset;
mod status;

pub use envelope::{group, split_by_partition, Envelope, Record};
pub use offset::{Offset, OffsetGroup, PartitionId};
pub use status::{DeliveryMode, StageKind};
