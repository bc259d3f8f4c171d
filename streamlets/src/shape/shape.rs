//! Streamlet shapes: the set of declared inlets and outlets.

use super::ports::{Inlet, Outlet, PortSpec};
use crate::core::Record;
use crate::errors::ShapeMismatchError;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").ok());

/// Returns true if `name` is a valid port or streamlet name.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.as_ref().is_some_and(|re| re.is_match(name))
}

/// The fixed set of ports a streamlet declares.
#[derive(Debug, Clone, Default)]
pub struct Shape {
    inlets: Vec<PortSpec>,
    outlets: Vec<PortSpec>,
}

impl Shape {
    /// Starts building a shape.
    #[must_use]
    pub fn builder() -> ShapeBuilder {
        ShapeBuilder::default()
    }

    /// Declared inlets, in declaration order.
    #[must_use]
    pub fn inlets(&self) -> &[PortSpec] {
        &self.inlets
    }

    /// Declared outlets, in declaration order.
    #[must_use]
    pub fn outlets(&self) -> &[PortSpec] {
        &self.outlets
    }

    /// Looks up an inlet by name.
    #[must_use]
    pub fn inlet(&self, name: &str) -> Option<&PortSpec> {
        self.inlets.iter().find(|p| p.name == name)
    }

    /// Looks up an outlet by name.
    #[must_use]
    pub fn outlet(&self, name: &str) -> Option<&PortSpec> {
        self.outlets.iter().find(|p| p.name == name)
    }

    /// Returns true if the shape declares no ports.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inlets.is_empty() && self.outlets.is_empty()
    }

    /// Checks that `port` is a declared inlet carrying `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] for unknown ports or type conflicts.
    pub fn check_inlet<T: Record>(&self, owner: &str, port: &Inlet<T>) -> Result<(), ShapeMismatchError> {
        let spec = self
            .inlet(port.name())
            .ok_or_else(|| ShapeMismatchError::unknown_port(owner, port.name()))?;
        if spec.carries::<T>() {
            Ok(())
        } else {
            Err(ShapeMismatchError::type_mismatch(
                port.name(),
                spec.type_name,
                std::any::type_name::<T>(),
            ))
        }
    }

    /// Checks that `port` is a declared outlet carrying `T`.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] for unknown ports or type conflicts.
    pub fn check_outlet<T: Record>(&self, owner: &str, port: &Outlet<T>) -> Result<(), ShapeMismatchError> {
        let spec = self
            .outlet(port.name())
            .ok_or_else(|| ShapeMismatchError::unknown_port(owner, port.name()))?;
        if spec.carries::<T>() {
            Ok(())
        } else {
            Err(ShapeMismatchError::type_mismatch(
                port.name(),
                spec.type_name,
                std::any::type_name::<T>(),
            ))
        }
    }
}

/// Builder for [`Shape`].
#[derive(Debug, Default)]
pub struct ShapeBuilder {
    inlets: Vec<PortSpec>,
    outlets: Vec<PortSpec>,
}

impl ShapeBuilder {
    /// Adds an inlet.
    #[must_use]
    pub fn inlet<T: Record>(mut self, inlet: &Inlet<T>) -> Self {
        self.inlets.push(inlet.spec());
        self
    }

    /// Adds an outlet.
    #[must_use]
    pub fn outlet<T: Record>(mut self, outlet: &Outlet<T>) -> Self {
        self.outlets.push(outlet.spec());
        self
    }

    /// Validates names and builds the shape.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeMismatchError`] for invalid or duplicate names.
    pub fn build(self) -> Result<Shape, ShapeMismatchError> {
        check_side("inlet", &self.inlets)?;
        check_side("outlet", &self.outlets)?;
        Ok(Shape {
            inlets: self.inlets,
            outlets: self.outlets,
        })
    }
}

fn check_side(side: &str, ports: &[PortSpec]) -> Result<(), ShapeMismatchError> {
    let mut seen = HashSet::new();
    for port in ports {
        if !is_valid_name(&port.name) {
            return Err(ShapeMismatchError::invalid_port_name(&port.name));
        }
        if !seen.insert(port.name.as_str()) {
            return Err(ShapeMismatchError::duplicate_port(side, &port.name));
        }
    }
    Ok(())
}
