//! Marker-detecting camera.

use super::calibration::Calibration;
use super::camera::FrameSource;
use super::marker::{Marker, MarkerSizes, MarkerType};
use super::quad::QuadDetector;
use super::{Frame, VisionError};
use aprilgrid::detector::TagDetector;
use glam::Vec2;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;
use std::sync::Arc;

const OUTLINE_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTRE_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const ORIGIN_COLOUR: Rgb<u8> = Rgb([0, 0, 255]);

/// Locates tags and reports their corners top-left first, clockwise on screen.
enum Finder {
    /// Standalone tags with a quiet zone.
    Quads(QuadDetector),
    /// Tags on a Kalibr AprilGrid, found from the grid's saddle points.
    Grid(TagDetector),
}

impl Finder {
    fn new(marker_type: MarkerType) -> Self {
        if marker_type.is_grid() {
            Finder::Grid(TagDetector::new(&aprilgrid::TagFamily::T36H11, None))
        } else {
            Finder::Quads(QuadDetector::new(marker_type.layout()))
        }
    }

    fn find(&self, image: &RgbImage) -> Vec<(u32, [Vec2; 4])> {
        let image = DynamicImage::ImageRgb8(image.clone());
        match self {
            Finder::Quads(detector) => detector
                .detect(&image.to_luma8())
                .into_iter()
                .map(|tag| (tag.id, tag.corners))
                .collect(),
            Finder::Grid(detector) => detector
                .detect(&image)
                .into_iter()
                .map(|(id, corners)| (id, from_grid_order(corners)))
                .collect(),
        }
    }
}

/// aprilgrid reports bottom-left first, counter-clockwise on screen.
fn from_grid_order(corners: [(f32, f32); 4]) -> [Vec2; 4] {
    let [bl, br, tr, tl] = corners.map(|(x, y)| Vec2::new(x, y));
    [tl, tr, br, bl]
}

/// A camera that detects fiducial markers in the frames it captures.
///
/// Every processing call either captures a fresh frame from the source or
/// reprocesses a frame supplied by the caller.
pub struct Camera<S: FrameSource> {
    source: S,
    finder: Finder,
    marker_type: MarkerType,
    sizes: MarkerSizes,
    calibration: Option<Arc<Calibration>>,
}

impl<S: FrameSource> Camera<S> {
    /// Wraps `source`, detecting `marker_type` markers sized by `sizes`.
    ///
    /// Poses are only estimated when a calibration is given.
    pub fn new(
        source: S,
        marker_type: MarkerType,
        sizes: MarkerSizes,
        calibration: Option<Calibration>,
    ) -> Self {
        tracing::debug!(
            %marker_type,
            calibrated = calibration.is_some(),
            resolution = ?source.resolution(),
            "camera ready"
        );
        Self {
            source,
            finder: Finder::new(marker_type),
            marker_type,
            sizes,
            calibration: calibration.map(Arc::new),
        }
    }

    /// Marker family this camera detects.
    #[inline]
    pub fn marker_type(&self) -> MarkerType {
        self.marker_type
    }

    /// Calibration used for pose estimation, if any.
    #[inline]
    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_deref()
    }

    /// The underlying frame source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Whether the underlying source is still open.
    pub fn is_open(&self) -> bool {
        self.source.is_open()
    }

    /// Captures a raw frame.
    pub fn capture_frame(&mut self) -> Result<Frame, VisionError> {
        self.source.capture()
    }

    /// Detects markers, leaving pose estimation until each pose is read.
    pub fn process_frame(&mut self, frame: Option<&Frame>) -> Result<Vec<Marker>, VisionError> {
        let image = self.image_for(frame)?;
        Ok(self.detect(&image))
    }

    /// Detects markers and estimates every pose before returning.
    pub fn process_frame_eager(
        &mut self,
        frame: Option<&Frame>,
    ) -> Result<Vec<Marker>, VisionError> {
        let image = self.image_for(frame)?;
        Ok(self.detect(&image).into_iter().map(Marker::into_eager).collect())
    }

    /// Returns the ids of visible markers, in ascending order.
    pub fn get_visible_markers(&mut self, frame: Option<&Frame>) -> Result<Vec<u32>, VisionError> {
        let image = self.image_for(frame)?;
        let mut ids: Vec<u32> = self.finder.find(&image).into_iter().map(|(id, _)| id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Writes a frame to `path`, optionally outlining detected markers.
    ///
    /// The image format is chosen from the file extension.
    pub fn save_frame(
        &mut self,
        path: &Path,
        annotate: bool,
        frame: Option<&Frame>,
    ) -> Result<(), VisionError> {
        let mut image = self.image_for(frame)?;
        if annotate {
            let markers = self.detect(&image);
            annotate_markers(&mut image, &markers);
        }
        image.save(path)?;
        tracing::info!(path = %path.display(), annotate, "saved frame");
        Ok(())
    }

    /// Releases the underlying device. Further captures fail with
    /// [`VisionError::CameraClosed`].
    pub fn close(&mut self) {
        self.source.close();
    }

    fn image_for(&mut self, frame: Option<&Frame>) -> Result<RgbImage, VisionError> {
        let image = match frame {
            Some(frame) => frame.to_image(),
            None => self.source.capture()?.to_image(),
        };
        match image {
            Some(image) if image.width() > 0 && image.height() > 0 => Ok(image),
            _ => Err(VisionError::InvalidFrame),
        }
    }

    fn detect(&self, image: &RgbImage) -> Vec<Marker> {
        let mut markers: Vec<Marker> = self
            .finder
            .find(image)
            .into_iter()
            .map(|(id, corners)| {
                Marker::new(
                    id,
                    self.marker_type,
                    self.sizes.size_of(id),
                    corners,
                    self.calibration.clone(),
                )
            })
            .collect();
        markers.sort_by_key(Marker::id);
        tracing::trace!(count = markers.len(), "detected markers");
        markers
    }
}

impl<S: FrameSource> std::fmt::Debug for Camera<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("marker_type", &self.marker_type)
            .field("sizes", &self.sizes)
            .field("calibrated", &self.calibration.is_some())
            .field("open", &self.source.is_open())
            .finish()
    }
}

/// Draws marker outlines, centres and first corners onto `image`.
pub fn annotate_markers(image: &mut RgbImage, markers: &[Marker]) {
    for marker in markers {
        let corners = marker.pixel_corners();
        for i in 0..4 {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), OUTLINE_COLOUR);
        }

        let centre = marker.pixel_centre();
        draw_cross_mut(image, CENTRE_COLOUR, centre.x.round() as i32, centre.y.round() as i32);

        let origin = corners[0];
        draw_filled_rect_mut(
            image,
            Rect::at(origin.x.round() as i32 - 2, origin.y.round() as i32 - 2).of_size(5, 5),
            ORIGIN_COLOUR,
        );
    }
}
