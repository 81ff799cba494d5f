//! Camera device abstraction.
//!
//! A [`CameraDriver`] enumerates devices and opens them as [`FrameSource`]s.
//! Real webcams are driven through `nokhwa` (feature `camera`); the mock
//! driver generates synthetic frames for testing and demos.

use super::{Frame, VisionError};
use image::RgbImage;

/// A source of frames, typically one opened camera device.
pub trait FrameSource {
    /// Captures a single frame.
    fn capture(&mut self) -> Result<Frame, VisionError>;

    /// Returns the frame size this source produces.
    fn resolution(&self) -> (u32, u32);

    /// Checks if the source is currently open.
    fn is_open(&self) -> bool;

    /// Closes the source and releases the device.
    fn close(&mut self);
}

/// Enumerates and opens camera devices.
pub trait CameraDriver {
    /// The frame source produced by [`CameraDriver::open`].
    type Source: FrameSource;

    /// Lists the device ids of all cameras visible to the system.
    fn find_camera_ids(&self) -> Result<Vec<u32>, VisionError>;

    /// Opens a camera, requesting `resolution` when one is given.
    fn open(
        &self,
        camera_id: u32,
        resolution: Option<(u32, u32)>,
    ) -> Result<Self::Source, VisionError>;
}

/// Default resolution used when nothing else is requested.
pub const DEFAULT_RESOLUTION: (u32, u32) = (640, 480);

/// Mock frame source that replays a scene or generates black frames.
#[derive(Debug)]
pub struct MockSource {
    camera_id: u32,
    resolution: (u32, u32),
    scene: Option<RgbImage>,
    sequence: u64,
    open: bool,
}

impl MockSource {
    /// Opens mock camera `camera_id` producing black frames.
    pub fn new(camera_id: u32, resolution: (u32, u32)) -> Self {
        Self {
            camera_id,
            resolution,
            scene: None,
            sequence: 0,
            open: true,
        }
    }

    /// Replays `scene` on every capture instead of the synthetic pattern.
    pub fn with_scene(mut self, scene: RgbImage) -> Self {
        self.resolution = scene.dimensions();
        self.scene = Some(scene);
        self
    }

    /// Device id this source was opened as.
    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }
}

impl FrameSource for MockSource {
    fn capture(&mut self) -> Result<Frame, VisionError> {
        if !self.open {
            return Err(VisionError::CameraClosed);
        }
        self.sequence += 1;

        if let Some(scene) = &self.scene {
            return Ok(Frame::from_image(scene.clone(), self.sequence));
        }

        // Black frame: nothing for the detector to find
        let (width, height) = self.resolution;
        Ok(Frame::from_image(RgbImage::new(width, height), self.sequence))
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            tracing::info!(camera_id = self.camera_id, "MockSource closed");
        }
    }
}

/// Mock driver exposing a fixed list of device ids.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    camera_ids: Vec<u32>,
    scene: Option<RgbImage>,
}

impl MockDriver {
    /// A driver reporting exactly `camera_ids`.
    pub fn new(camera_ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            camera_ids: camera_ids.into_iter().collect(),
            scene: None,
        }
    }

    /// Every source opened by this driver replays `scene`.
    pub fn with_scene(mut self, scene: RgbImage) -> Self {
        self.scene = Some(scene);
        self
    }
}

impl CameraDriver for MockDriver {
    type Source = MockSource;

    fn find_camera_ids(&self) -> Result<Vec<u32>, VisionError> {
        Ok(self.camera_ids.clone())
    }

    fn open(
        &self,
        camera_id: u32,
        resolution: Option<(u32, u32)>,
    ) -> Result<MockSource, VisionError> {
        if !self.camera_ids.contains(&camera_id) {
            return Err(VisionError::DeviceNotFound(format!("mock camera {camera_id}")));
        }
        let source = MockSource::new(camera_id, resolution.unwrap_or(DEFAULT_RESOLUTION));
        let source = match &self.scene {
            Some(scene) => source.with_scene(scene.clone()),
            None => source,
        };
        tracing::info!(camera_id, resolution = ?source.resolution(), "MockSource opened");
        Ok(source)
    }
}

#[cfg(feature = "camera")]
pub use self::native::{NokhwaDriver, NokhwaSource};

#[cfg(feature = "camera")]
mod native {
    use super::{CameraDriver, FrameSource, DEFAULT_RESOLUTION};
    use crate::vision::{Frame, VisionError};
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    };

    /// Driver for real cameras using the platform's native capture API.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NokhwaDriver;

    /// An open native camera stream.
    pub struct NokhwaSource {
        camera: nokhwa::Camera,
        camera_id: u32,
        sequence: u64,
        open: bool,
    }

    impl CameraDriver for NokhwaDriver {
        type Source = NokhwaSource;

        fn find_camera_ids(&self) -> Result<Vec<u32>, VisionError> {
            let devices = nokhwa::query(ApiBackend::Auto)
                .map_err(|e| VisionError::EnumerationFailed(e.to_string()))?;
            Ok(devices
                .iter()
                .filter_map(|info| info.index().as_index().ok())
                .collect())
        }

        fn open(
            &self,
            camera_id: u32,
            resolution: Option<(u32, u32)>,
        ) -> Result<NokhwaSource, VisionError> {
            let (width, height) = resolution.unwrap_or(DEFAULT_RESOLUTION);
            let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30),
            ));

            let mut camera = nokhwa::Camera::new(CameraIndex::Index(camera_id), format)
                .map_err(|e| VisionError::DeviceNotFound(e.to_string()))?;
            camera
                .open_stream()
                .map_err(|e| VisionError::OpenFailed(e.to_string()))?;

            tracing::info!(camera_id, format = ?camera.camera_format(), "camera opened");
            Ok(NokhwaSource {
                camera,
                camera_id,
                sequence: 0,
                open: true,
            })
        }
    }

    impl FrameSource for NokhwaSource {
        fn capture(&mut self) -> Result<Frame, VisionError> {
            if !self.open {
                return Err(VisionError::CameraClosed);
            }
            let buffer = self
                .camera
                .frame()
                .map_err(|e| VisionError::CaptureFailed(e.to_string()))?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .map_err(|e| VisionError::CaptureFailed(e.to_string()))?;

            self.sequence += 1;
            let (width, height) = (decoded.width(), decoded.height());
            Ok(Frame::new(decoded.into_raw(), width, height, self.sequence))
        }

        fn resolution(&self) -> (u32, u32) {
            let resolution = self.camera.resolution();
            (resolution.width(), resolution.height())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            if !self.open {
                return;
            }
            if let Err(e) = self.camera.stop_stream() {
                tracing::warn!(camera_id = self.camera_id, "failed to stop stream: {}", e);
            }
            self.open = false;
            tracing::info!(camera_id = self.camera_id, "camera closed");
        }
    }
}
