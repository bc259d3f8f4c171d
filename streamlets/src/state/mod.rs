//! Keyed state for stateful operators such as aggregations.

mod store;

pub use store::StateStore;
