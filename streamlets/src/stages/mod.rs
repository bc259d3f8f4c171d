//! Streamlet trait and logic kinds.
//!
//! Streamlets are the deployable units of a pipeline: a fixed [`Shape`]
//! plus logic that is created afresh on every start.

mod logic;

pub use logic::StreamletLogic;

use crate::errors::ShapeMismatchError;
use crate::shape::Shape;
use std::fmt::Debug;

/// A processing stage with typed ports.
///
/// `shape` must describe the same ports on every call. `create_logic` is
/// called exactly once per start; any state the logic needs should be
/// created there or taken from the [`StreamletContext`](crate::context::StreamletContext).
pub trait Streamlet: Send + Sync + Debug {
    /// Declares the streamlet's ports.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] if port names are invalid or repeated.
    fn shape(&self) -> Result<Shape, ShapeMismatchError>;

    /// Creates the logic for one start.
    fn create_logic(&self) -> StreamletLogic;
}
