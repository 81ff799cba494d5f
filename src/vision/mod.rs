//! Marker vision: camera capture, marker detection and pose estimation.
//!
//! This layer owns the camera devices and all image processing. Standalone
//! tags are found as dark quads and decoded against the `aprilgrid` family
//! codebooks; Kalibr boards use the `aprilgrid` grid detector. Capture goes
//! through a [`CameraDriver`], either a native camera (feature `camera`) or
//! the [`MockDriver`].

mod calibration;
mod camera;
mod detector;
mod error;
mod frame;
mod marker;
mod quad;

pub use calibration::{parse_calibration_file, Calibration, CalibrationError};
pub use camera::{CameraDriver, FrameSource, MockDriver, MockSource, DEFAULT_RESOLUTION};
#[cfg(feature = "camera")]
pub use camera::{NokhwaDriver, NokhwaSource};
pub use detector::{annotate_markers, Camera};
pub use error::VisionError;
pub use frame::Frame;
pub use marker::{Marker, MarkerSizes, MarkerType, Pose};

#[cfg(test)]
pub(crate) use quad::tests::tag_scene;

/// Version of the vision layer, reported as board firmware.
///
/// Versioned apart from the crate: bump it when detection or pose output
/// changes.
pub const VERSION: &str = "2.0.0";
