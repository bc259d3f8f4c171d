//! Ports and shapes.
//!
//! A streamlet declares typed [`Inlet`]s and [`Outlet`]s and groups them
//! into a [`Shape`]. Shapes are validated once, when they are built.

mod ports;
#[allow(clippy::module_inception)]
mod shape;

pub use ports::{Inlet, Outlet, PortSpec, TopicFactory};
pub use shape::{is_valid_name, Shape, ShapeBuilder};
