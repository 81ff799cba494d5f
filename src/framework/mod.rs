//! Hardware abstraction contracts.
//!
//! A [`Backend`] discovers hardware and produces [`Board`]s. Each board
//! carries [`Component`]s, and each component kind names the
//! [`InterfaceKind`] its backend must implement. Discovered boards are
//! collected into a [`BoardGroup`], which makes them safe on shutdown.

mod backend;
mod board;
mod component;

pub use backend::Backend;
pub use board::{Board, BoardGroup, FrameworkError};
pub use component::{Component, ComponentKind, InterfaceKind};
