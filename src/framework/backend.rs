//! Backend contract.

use super::Board;

/// Binds boards to real devices.
pub trait Backend: Sized {
    /// The board type this backend produces.
    type Board: Board;

    /// Everything discovery needs: configuration and device access.
    type Context;

    /// Error raised during discovery.
    type Error: std::error::Error;

    /// Finds every board this backend can control.
    fn discover(context: &Self::Context) -> Result<Vec<Self::Board>, Self::Error>;

    /// Firmware version reported by the boards of this backend.
    fn firmware_version(&self) -> Option<String>;
}
