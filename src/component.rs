//! Fiducial marker camera component.

use crate::framework::{Component, ComponentKind, InterfaceKind};
use crate::vision::{Frame, Marker, VisionError};
use std::path::Path;

/// Operations a backend must provide to drive a [`MarkerCamera`].
///
/// Every `identifier` is the component identifier on its board. Backends
/// drive one camera each and ignore it. A `frame`, when given, is processed
/// instead of capturing a new one.
pub trait MarkerCameraInterface {
    /// Detects markers without estimating their poses up front.
    fn process_frame(
        &mut self,
        identifier: u8,
        frame: Option<&Frame>,
    ) -> Result<Vec<Marker>, VisionError>;

    /// Detects markers and estimates every pose before returning.
    fn process_frame_eager(
        &mut self,
        identifier: u8,
        frame: Option<&Frame>,
    ) -> Result<Vec<Marker>, VisionError>;

    /// Saves an image with detected markers drawn on it.
    fn save_annotated_image(
        &mut self,
        identifier: u8,
        file: &Path,
        frame: Option<&Frame>,
    ) -> Result<(), VisionError>;

    /// Returns the ids of visible markers. Never estimates poses.
    fn get_visible_markers(
        &mut self,
        identifier: u8,
        frame: Option<&Frame>,
    ) -> Result<Vec<u32>, VisionError>;

    /// Gets the raw image data from the camera.
    fn capture_frame(&mut self) -> Result<Frame, VisionError>;

    /// Releases the camera.
    fn close_camera(&mut self, identifier: u8) -> Result<(), VisionError>;
}

/// Camera that can identify fiducial markers.
///
/// With a calibration available it also estimates the position and
/// orientation of every marker it detects.
#[derive(Debug)]
pub struct MarkerCamera<B> {
    identifier: u8,
    backend: B,
}

impl<B: MarkerCameraInterface> MarkerCamera<B> {
    /// Creates the component `identifier` driven by `backend`.
    pub fn new(identifier: u8, backend: B) -> Self {
        Self {
            identifier,
            backend,
        }
    }

    /// The backend this component drives.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Captures an image and identifies fiducial markers.
    ///
    /// With `eager` set, marker poses are estimated before returning.
    pub fn see(&mut self, eager: bool, frame: Option<&Frame>) -> Result<Vec<Marker>, VisionError> {
        if eager {
            self.backend.process_frame_eager(self.identifier, frame)
        } else {
            self.backend.process_frame(self.identifier, frame)
        }
    }

    /// Returns the ids of visible markers. Faster than [`MarkerCamera::see`].
    pub fn see_ids(&mut self, frame: Option<&Frame>) -> Result<Vec<u32>, VisionError> {
        self.backend.get_visible_markers(self.identifier, frame)
    }

    /// Gets the raw image data from the camera.
    pub fn capture(&mut self) -> Result<Frame, VisionError> {
        self.backend.capture_frame()
    }

    /// Saves an annotated image to `path`.
    pub fn save(&mut self, path: impl AsRef<Path>, frame: Option<&Frame>) -> Result<(), VisionError> {
        self.backend
            .save_annotated_image(self.identifier, path.as_ref(), frame)
    }

    /// Closes the camera. It will no longer capture after this.
    pub fn close(&mut self) -> Result<(), VisionError> {
        self.backend.close_camera(self.identifier)
    }
}

impl<B: MarkerCameraInterface> Component for MarkerCamera<B> {
    fn identifier(&self) -> u8 {
        self.identifier
    }

    fn kind() -> ComponentKind {
        ComponentKind::MarkerCamera
    }

    fn interface_kind() -> InterfaceKind {
        InterfaceKind::MarkerCamera
    }
}
