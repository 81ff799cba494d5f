//! Hardware backends driving marker cameras.
//!
//! Two discovery policies are provided:
//!
//! - [`HardwareBackend`] finds every camera on the system and sizes each
//!   stream from the configured calibration.
//! - [`SingleHardwareBackend`] always drives camera 0 and nothing else.
//!
//! Both take a [`CameraDriver`] which decides how devices are found and
//! opened, and a [`BackendConfig`] selecting marker family, sizes and
//! calibration.

use crate::board::MarkerCameraBoard;
use crate::component::MarkerCameraInterface;
use crate::config::BackendConfig;
use crate::framework::Backend;
use crate::vision::{
    parse_calibration_file, Calibration, Camera, CameraDriver, Frame, Marker, VisionError,
};
use std::collections::BTreeSet;
use std::path::Path;

/// Device index driven by [`SingleHardwareBackend`].
pub const SINGLE_CAMERA_ID: u32 = 0;

/// What a backend needs to discover boards.
#[derive(Debug, Clone, Default)]
pub struct HardwareContext<D> {
    /// Marker family, sizes and calibration for every discovered camera.
    pub config: BackendConfig,
    /// Finds and opens camera devices.
    pub driver: D,
}

impl<D: CameraDriver> HardwareContext<D> {
    /// Bundles a configuration with a driver.
    pub fn new(config: BackendConfig, driver: D) -> Self {
        Self { config, driver }
    }
}

fn load_calibration(config: &BackendConfig) -> Result<Option<Calibration>, VisionError> {
    Ok(config
        .calibration_file
        .as_deref()
        .map(parse_calibration_file)
        .transpose()?)
}

/// Backend for every camera attached to the system.
pub struct HardwareBackend<D: CameraDriver> {
    camera: Camera<D::Source>,
    camera_id: u32,
}

impl<D: CameraDriver> HardwareBackend<D> {
    /// Opens camera `camera_id`.
    ///
    /// With a calibration file configured, the stream is opened at the
    /// resolution the calibration was taken at.
    pub fn new(camera_id: u32, config: &BackendConfig, driver: &D) -> Result<Self, VisionError> {
        let calibration = load_calibration(config)?;
        let resolution = calibration.as_ref().map(|c| c.resolution);
        let source = driver.open(camera_id, resolution)?;

        Ok(Self {
            camera: Camera::new(source, config.marker_type, config.marker_sizes(), calibration),
            camera_id,
        })
    }
}

/// Backend for only the first camera on the system.
pub struct SingleHardwareBackend<D: CameraDriver> {
    camera: Camera<D::Source>,
    camera_id: u32,
}

impl<D: CameraDriver> SingleHardwareBackend<D> {
    /// Opens camera `camera_id` at the driver's default resolution.
    pub fn new(camera_id: u32, config: &BackendConfig, driver: &D) -> Result<Self, VisionError> {
        let calibration = load_calibration(config)?;
        let source = driver.open(camera_id, None)?;

        Ok(Self {
            camera: Camera::new(source, config.marker_type, config.marker_sizes(), calibration),
            camera_id,
        })
    }
}

impl<D: CameraDriver> Backend for HardwareBackend<D> {
    type Board = MarkerCameraBoard<Self>;
    type Context = HardwareContext<D>;
    type Error = VisionError;

    fn discover(context: &HardwareContext<D>) -> Result<Vec<Self::Board>, VisionError> {
        let camera_ids: BTreeSet<u32> = context.driver.find_camera_ids()?.into_iter().collect();
        tracing::debug!(?camera_ids, "found cameras");

        camera_ids
            .into_iter()
            .map(|camera_id| {
                let backend = Self::new(camera_id, &context.config, &context.driver)?;
                Ok(MarkerCameraBoard::new(camera_id.to_string(), backend))
            })
            .collect()
    }

    fn firmware_version(&self) -> Option<String> {
        Some(format!("Marker Vision v{}", crate::vision::VERSION))
    }
}

impl<D: CameraDriver> Backend for SingleHardwareBackend<D> {
    type Board = MarkerCameraBoard<Self>;
    type Context = HardwareContext<D>;
    type Error = VisionError;

    fn discover(context: &HardwareContext<D>) -> Result<Vec<Self::Board>, VisionError> {
        let backend = Self::new(SINGLE_CAMERA_ID, &context.config, &context.driver)?;
        Ok(vec![MarkerCameraBoard::new(
            SINGLE_CAMERA_ID.to_string(),
            backend,
        )])
    }

    fn firmware_version(&self) -> Option<String> {
        Some(format!(
            "Marker Vision v{} (single camera)",
            crate::vision::VERSION
        ))
    }
}

/// Both backends forward the interface to their camera unchanged.
macro_rules! impl_marker_camera_interface {
    ($backend:ident) => {
        impl<D: CameraDriver> $backend<D> {
            /// Device index of the driven camera.
            pub fn camera_id(&self) -> u32 {
                self.camera_id
            }

            /// The vision-layer camera behind the interface.
            pub fn camera(&self) -> &Camera<D::Source> {
                &self.camera
            }
        }

        impl<D: CameraDriver> MarkerCameraInterface for $backend<D> {
            fn process_frame(
                &mut self,
                _identifier: u8,
                frame: Option<&Frame>,
            ) -> Result<Vec<Marker>, VisionError> {
                self.camera.process_frame(frame)
            }

            fn process_frame_eager(
                &mut self,
                _identifier: u8,
                frame: Option<&Frame>,
            ) -> Result<Vec<Marker>, VisionError> {
                self.camera.process_frame_eager(frame)
            }

            fn save_annotated_image(
                &mut self,
                _identifier: u8,
                file: &Path,
                frame: Option<&Frame>,
            ) -> Result<(), VisionError> {
                self.camera.save_frame(file, true, frame)
            }

            fn get_visible_markers(
                &mut self,
                _identifier: u8,
                frame: Option<&Frame>,
            ) -> Result<Vec<u32>, VisionError> {
                self.camera.get_visible_markers(frame)
            }

            fn capture_frame(&mut self) -> Result<Frame, VisionError> {
                self.camera.capture_frame()
            }

            fn close_camera(&mut self, _identifier: u8) -> Result<(), VisionError> {
                self.camera.close();
                Ok(())
            }
        }

        impl<D: CameraDriver> std::fmt::Debug for $backend<D> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($backend))
                    .field("camera_id", &self.camera_id)
                    .field("camera", &self.camera)
                    .finish()
            }
        }
    };
}

impl_marker_camera_interface!(HardwareBackend);
impl_marker_camera_interface!(SingleHardwareBackend);
