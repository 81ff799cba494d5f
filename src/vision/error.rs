//! Errors raised by the marker vision layer.

use super::calibration::CalibrationError;
use thiserror::Error;

/// Errors that can occur while capturing or processing frames.
#[derive(Debug, Error)]
pub enum VisionError {
    /// No camera with the requested id.
    #[error("camera device not found: {0}")]
    DeviceNotFound(String),
    /// The system could not list its cameras.
    #[error("failed to enumerate cameras: {0}")]
    EnumerationFailed(String),
    /// The camera exists but its stream could not be started.
    #[error("failed to open camera: {0}")]
    OpenFailed(String),
    /// The camera failed to deliver or decode a frame.
    #[error("failed to capture frame: {0}")]
    CaptureFailed(String),
    /// Capture was requested after the camera was closed.
    #[error("camera has been closed")]
    CameraClosed,
    /// A frame with no pixels, or whose buffer disagrees with its size.
    #[error("frame is empty or its buffer does not match its dimensions")]
    InvalidFrame,
    /// Loading the calibration failed.
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    /// Encoding or writing an image failed.
    #[error("failed to write image: {0}")]
    ImageWrite(#[from] image::ImageError),
}
