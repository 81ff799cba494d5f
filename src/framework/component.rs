//! Component contracts.

use std::fmt;

/// Kinds of component a board can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// A camera that detects fiducial markers.
    MarkerCamera,
}

/// Backend interfaces required by component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceKind {
    /// [`crate::component::MarkerCameraInterface`].
    MarkerCamera,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::MarkerCamera => f.write_str("marker camera"),
        }
    }
}

/// A typed capability attached to a board.
pub trait Component {
    /// Identifies the component among those of the same kind on its board.
    fn identifier(&self) -> u8;

    /// The kind of this component.
    fn kind() -> ComponentKind
    where
        Self: Sized;

    /// The interface a backend must implement to drive this component.
    fn interface_kind() -> InterfaceKind
    where
        Self: Sized;
}
