//! Camera board for detecting fiducial markers.

use crate::component::{MarkerCamera, MarkerCameraInterface};
use crate::framework::{Backend, Board, ComponentKind};
use crate::vision::{Frame, Marker, VisionError};
use std::collections::HashSet;
use std::path::Path;

/// Board wrapping a single marker camera.
///
/// The board owns its backend through the camera component; the camera
/// operations below proxy to that component.
#[derive(Debug)]
pub struct MarkerCameraBoard<B> {
    serial: String,
    camera: MarkerCamera<B>,
}

impl<B: MarkerCameraInterface + Backend> MarkerCameraBoard<B> {
    /// Name reported by every marker camera board.
    pub const NAME: &'static str = "Marker Camera Board";

    /// Creates a board with one camera, component 0, on `backend`.
    pub fn new(serial: impl Into<String>, backend: B) -> Self {
        Self {
            serial: serial.into(),
            camera: MarkerCamera::new(0, backend),
        }
    }

    /// The backend driving the camera.
    pub fn backend(&self) -> &B {
        self.camera.backend()
    }

    /// The camera component.
    pub fn camera(&self) -> &MarkerCamera<B> {
        &self.camera
    }

    /// Captures an image and identifies fiducial markers.
    ///
    /// * `eager` - estimate marker poses immediately.
    /// * `frame` - process this frame instead of capturing one.
    pub fn see(&mut self, eager: bool, frame: Option<&Frame>) -> Result<Vec<Marker>, VisionError> {
        self.camera.see(eager, frame)
    }

    /// Identifies visible markers without pose estimation, so is faster
    /// than [`MarkerCameraBoard::see`].
    pub fn see_ids(&mut self, frame: Option<&Frame>) -> Result<Vec<u32>, VisionError> {
        self.camera.see_ids(frame)
    }

    /// Gets the raw image data from the camera.
    pub fn capture(&mut self) -> Result<Frame, VisionError> {
        self.camera.capture()
    }

    /// Saves an annotated image to a path.
    pub fn save(&mut self, path: impl AsRef<Path>, frame: Option<&Frame>) -> Result<(), VisionError> {
        self.camera.save(path, frame)
    }
}

impl<B: MarkerCameraInterface + Backend> Board for MarkerCameraBoard<B> {
    type Error = VisionError;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn firmware_version(&self) -> Option<String> {
        self.camera.backend().firmware_version()
    }

    fn make_safe(&mut self) -> Result<(), VisionError> {
        tracing::debug!(serial = %self.serial, "making board safe");
        self.camera.close()
    }

    fn supported_components() -> HashSet<ComponentKind> {
        HashSet::from([ComponentKind::MarkerCamera])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::tests::{Call, RecordingBackend};
    use std::convert::Infallible;
    use std::path::PathBuf;

    impl Backend for RecordingBackend {
        type Board = MarkerCameraBoard<Self>;
        type Context = ();
        type Error = Infallible;

        fn discover(_: &()) -> Result<Vec<Self::Board>, Infallible> {
            Ok(vec![MarkerCameraBoard::new("stub", RecordingBackend::default())])
        }

        fn firmware_version(&self) -> Option<String> {
            Some("Stub v1".to_owned())
        }
    }

    fn board(ids: &[u32]) -> MarkerCameraBoard<RecordingBackend> {
        MarkerCameraBoard::new("7", RecordingBackend::with_markers(ids))
    }

    #[test]
    fn test_identity() {
        let board = board(&[]);
        assert_eq!(board.name(), "Marker Camera Board");
        assert_eq!(board.serial_number(), "7");
        assert_eq!(board.firmware_version().as_deref(), Some("Stub v1"));
    }

    #[test]
    fn test_supports_only_marker_camera() {
        let supported = MarkerCameraBoard::<RecordingBackend>::supported_components();
        assert_eq!(supported, HashSet::from([ComponentKind::MarkerCamera]));
    }

    #[test]
    fn test_proxies_to_component() {
        let mut board = board(&[2, 8]);
        let frame = Frame::new(vec![0; 3], 1, 1, 5);

        assert_eq!(board.see(true, None).unwrap().len(), 2);
        assert_eq!(board.see(false, Some(&frame)).unwrap().len(), 2);
        assert_eq!(board.see_ids(None).unwrap(), vec![2, 8]);
        assert_eq!(board.capture().unwrap().sequence(), 42);
        board.save("annotated.png", Some(&frame)).unwrap();

        assert_eq!(
            board.backend().calls,
            vec![
                Call::ProcessFrameEager(0, None),
                Call::ProcessFrame(0, Some(5)),
                Call::GetVisibleMarkers(0, None),
                Call::CaptureFrame,
                Call::SaveAnnotatedImage(0, PathBuf::from("annotated.png"), Some(5)),
            ]
        );
    }

    #[test]
    fn test_make_safe_closes_once() {
        let mut board = board(&[]);
        board.make_safe().unwrap();
        assert_eq!(board.backend().calls, vec![Call::CloseCamera(0)]);
    }

    #[test]
    fn test_discover_through_group() {
        let mut group = crate::framework::BoardGroup::discover::<RecordingBackend>(&()).unwrap();
        assert_eq!(group.singular().unwrap().serial_number(), "stub");
    }
}
