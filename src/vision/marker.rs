//! Detected markers and their poses.

use super::calibration::Calibration;
use glam::{DMat3, DQuat, DVec2, DVec3, EulerRot, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

/// Marker dictionaries understood by the detector.
///
/// The AprilTag families are printed as standalone tags with a one-cell
/// black border. [`MarkerType::Aprilgrid36h11`] is a Kalibr calibration
/// board: 36h11 tags with a two-cell border, joined at their corners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerType {
    /// AprilTag 16h5.
    #[serde(rename = "apriltag_16h5")]
    Apriltag16h5,
    /// AprilTag 25h7.
    #[serde(rename = "apriltag_25h7")]
    Apriltag25h7,
    /// AprilTag 25h9.
    #[serde(rename = "apriltag_25h9")]
    Apriltag25h9,
    /// AprilTag 36h11.
    #[default]
    #[serde(rename = "apriltag_36h11")]
    Apriltag36h11,
    /// 36h11 tags on a Kalibr AprilGrid board.
    #[serde(rename = "aprilgrid_36h11")]
    Aprilgrid36h11,
}

/// Bit layout and codebook of a marker family.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagLayout {
    /// Valid codes, indexed by marker id.
    pub codes: &'static [u64],
    /// Data cells along one side.
    pub edge_bits: u32,
    /// Black border width in cells.
    pub border_bits: u32,
    /// Bit errors tolerated when matching a code.
    pub max_correction: u32,
}

impl MarkerType {
    pub(crate) fn layout(self) -> TagLayout {
        let (edge_bits, max_correction) = match self {
            MarkerType::Apriltag16h5 => (4, 0),
            MarkerType::Apriltag25h7 => (5, 1),
            MarkerType::Apriltag25h9 => (5, 2),
            MarkerType::Apriltag36h11 | MarkerType::Aprilgrid36h11 => (6, 2),
        };
        TagLayout {
            codes: self.codes(),
            edge_bits,
            border_bits: if self.is_grid() { 2 } else { 1 },
            max_correction,
        }
    }

    fn codes(self) -> &'static [u64] {
        use aprilgrid::tag_families::{T16H5, T25H7, T25H9, T36H11};
        match self {
            MarkerType::Apriltag16h5 => &T16H5,
            MarkerType::Apriltag25h7 => &T25H7,
            MarkerType::Apriltag25h9 => &T25H9,
            MarkerType::Apriltag36h11 | MarkerType::Aprilgrid36h11 => &T36H11,
        }
    }

    /// Whether tags of this type only appear on a calibration board.
    pub fn is_grid(self) -> bool {
        self == MarkerType::Aprilgrid36h11
    }
}

impl fmt::Display for MarkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarkerType::Apriltag16h5 => "apriltag_16h5",
            MarkerType::Apriltag25h7 => "apriltag_25h7",
            MarkerType::Apriltag25h9 => "apriltag_25h9",
            MarkerType::Apriltag36h11 => "apriltag_36h11",
            MarkerType::Aprilgrid36h11 => "aprilgrid_36h11",
        };
        f.write_str(name)
    }
}

/// Physical marker side lengths in millimetres, by marker id.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSizes {
    default: u32,
    overrides: Vec<(Range<u32>, u32)>,
}

impl MarkerSizes {
    /// Every marker has the same size.
    pub fn fixed(size: u32) -> Self {
        Self {
            default: size,
            overrides: Vec::new(),
        }
    }

    /// Markers with ids in `ids` have side length `size`.
    ///
    /// Earlier overrides take precedence over later ones.
    pub fn with_override(mut self, ids: Range<u32>, size: u32) -> Self {
        self.overrides.push((ids, size));
        self
    }

    /// Side length of marker `marker_id` in millimetres.
    pub fn size_of(&self, marker_id: u32) -> u32 {
        self.overrides
            .iter()
            .find(|(ids, _)| ids.contains(&marker_id))
            .map(|&(_, size)| size)
            .unwrap_or(self.default)
    }
}

impl Default for MarkerSizes {
    fn default() -> Self {
        Self::fixed(250)
    }
}

/// Position and orientation of a marker relative to the camera.
///
/// Camera frame: x right, y down, z forward along the optical axis.
/// Translation is in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Marker centre in the camera frame.
    pub translation: DVec3,
    /// Rotation from marker axes to camera axes.
    pub rotation: DQuat,
}

impl Pose {
    /// Straight-line distance from the camera in millimetres.
    pub fn distance(&self) -> f64 {
        self.translation.length()
    }

    /// Horizontal angle to the marker in radians, positive to the right.
    pub fn bearing(&self) -> f64 {
        self.translation.x.atan2(self.translation.z)
    }

    /// Marker orientation as `(yaw, pitch, roll)` in radians.
    pub fn yaw_pitch_roll(&self) -> (f64, f64, f64) {
        self.rotation.to_euler(EulerRot::YXZ)
    }
}

/// A fiducial marker seen in a frame.
///
/// The pose is computed on first access to [`Marker::pose`]; markers
/// returned from the eager path already carry it.
#[derive(Debug, Clone)]
pub struct Marker {
    id: u32,
    marker_type: MarkerType,
    size: u32,
    pixel_corners: [Vec2; 4],
    calibration: Option<Arc<Calibration>>,
    pose: OnceLock<Option<Pose>>,
}

impl Marker {
    /// A marker seen at `pixel_corners`, ordered top-left first and
    /// clockwise on screen.
    pub fn new(
        id: u32,
        marker_type: MarkerType,
        size: u32,
        pixel_corners: [Vec2; 4],
        calibration: Option<Arc<Calibration>>,
    ) -> Self {
        Self {
            id,
            marker_type,
            size,
            pixel_corners,
            calibration,
            pose: OnceLock::new(),
        }
    }

    /// Marker id within its family.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Family the marker was decoded from.
    #[inline]
    pub fn marker_type(&self) -> MarkerType {
        self.marker_type
    }

    /// Side length in millimetres.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Corners in pixels: top-left, top-right, bottom-right, bottom-left.
    #[inline]
    pub fn pixel_corners(&self) -> &[Vec2; 4] {
        &self.pixel_corners
    }

    /// Mean of the four corners.
    pub fn pixel_centre(&self) -> Vec2 {
        self.pixel_corners.iter().copied().sum::<Vec2>() / 4.0
    }

    /// Whether a calibration is available for pose estimation.
    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Whether the pose has already been computed.
    pub fn is_eager(&self) -> bool {
        self.pose.get().is_some()
    }

    /// Returns the marker pose, estimating it if needed.
    ///
    /// `None` for uncalibrated markers or degenerate corner sets.
    pub fn pose(&self) -> Option<&Pose> {
        let calibration = self.calibration.as_deref()?;
        self.pose
            .get_or_init(|| estimate_pose(calibration, &self.pixel_corners, self.size))
            .as_ref()
    }

    /// Computes the pose now so later reads are free.
    pub(crate) fn into_eager(self) -> Self {
        let _ = self.pose();
        self
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let centre = self.pixel_centre();
        write!(
            f,
            "<Marker {} {} size={}mm centre=({:.1}, {:.1})",
            self.id, self.marker_type, self.size, centre.x, centre.y
        )?;
        if let Some(pose) = self.pose.get().and_then(Option::as_ref) {
            write!(f, " distance={:.0}mm", pose.distance())?;
        }
        f.write_str(">")
    }
}

/// Smallest pixel area a marker can have before its pose is meaningless.
const MIN_PIXEL_AREA: f32 = 4.0;

fn quad_area(corners: &[Vec2; 4]) -> f32 {
    let twice: f32 = (0..4)
        .map(|i| corners[i].perp_dot(corners[(i + 1) % 4]))
        .sum();
    twice.abs() / 2.0
}

/// Marker-plane corner positions for a square of side `size`, in the same
/// order as the detector reports pixel corners.
fn model_corners(size: f64) -> [DVec2; 4] {
    let h = size / 2.0;
    [
        DVec2::new(-h, -h),
        DVec2::new(h, -h),
        DVec2::new(h, h),
        DVec2::new(-h, h),
    ]
}

/// Estimates a planar square's pose from its four image corners.
pub(crate) fn estimate_pose(
    calibration: &Calibration,
    pixel_corners: &[Vec2; 4],
    size: u32,
) -> Option<Pose> {
    if quad_area(pixel_corners) < MIN_PIXEL_AREA {
        return None;
    }
    let model = model_corners(f64::from(size));
    let image = (*pixel_corners).map(|p| calibration.normalize(DVec2::new(p.x.into(), p.y.into())));
    let h = homography(&model, &image)?;

    let (mut h1, mut h2, mut t) = (h.x_axis, h.y_axis, h.z_axis);
    let norm = (h1.length() + h2.length()) / 2.0;
    if norm < f64::EPSILON {
        return None;
    }
    h1 /= norm;
    h2 /= norm;
    t /= norm;

    // Marker must sit in front of the camera
    if t.z < 0.0 {
        h1 = -h1;
        h2 = -h2;
        t = -t;
    }

    let r1 = h1.normalize();
    let r2 = (h2 - r1 * r1.dot(h2)).normalize();
    let r3 = r1.cross(r2);
    let rotation = DQuat::from_mat3(&DMat3::from_cols(r1, r2, r3)).normalize();

    if !t.is_finite() || !rotation.is_finite() {
        return None;
    }
    Some(Pose {
        translation: t,
        rotation,
    })
}

/// Solves the homography mapping `src` onto `dst` from four correspondences.
pub(super) fn homography(src: &[DVec2; 4], dst: &[DVec2; 4]) -> Option<DMat3> {
    let mut a = [[0.0f64; 9]; 8];
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        a[2 * i] = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -d.x * s.x, -d.x * s.y, d.x];
        a[2 * i + 1] = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -d.y * s.x, -d.y * s.y, d.y];
    }

    // Gaussian elimination with partial pivoting
    for col in 0..8 {
        let pivot = (col..8).max_by(|&r0, &r1| a[r0][col].abs().total_cmp(&a[r1][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = a[row][col] / a[col][col];
            if factor != 0.0 {
                for k in col..9 {
                    a[row][k] -= factor * a[col][k];
                }
            }
        }
    }

    let x: Vec<f64> = (0..8).map(|i| a[i][8] / a[i][i]).collect();
    Some(DMat3::from_cols(
        DVec3::new(x[0], x[3], x[6]),
        DVec3::new(x[1], x[4], x[7]),
        DVec3::new(x[2], x[5], 1.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn project(calibration: &Calibration, pose: &Pose, size: u32) -> [Vec2; 4] {
        model_corners(f64::from(size)).map(|m| {
            let p = pose.rotation * DVec3::new(m.x, m.y, 0.0) + pose.translation;
            Vec2::new(
                (calibration.fx() * p.x / p.z + calibration.cx()) as f32,
                (calibration.fy() * p.y / p.z + calibration.cy()) as f32,
            )
        })
    }

    #[test]
    fn test_pose_recovers_fronto_parallel_marker() {
        let calibration = Calibration::pinhole((640, 480), 800.0);
        let truth = Pose {
            translation: DVec3::new(100.0, -50.0, 1000.0),
            rotation: DQuat::IDENTITY,
        };
        let corners = project(&calibration, &truth, 250);

        let pose = estimate_pose(&calibration, &corners, 250).unwrap();
        assert!((pose.translation - truth.translation).length() < 1.0);
        assert!(pose.rotation.angle_between(truth.rotation) < 1e-3);
    }

    #[test]
    fn test_pose_recovers_rotated_marker() {
        let calibration = Calibration::pinhole((1280, 720), 1000.0);
        let truth = Pose {
            translation: DVec3::new(-200.0, 30.0, 1500.0),
            rotation: DQuat::from_rotation_y(0.4) * DQuat::from_rotation_x(-0.2),
        };
        let corners = project(&calibration, &truth, 150);

        let pose = estimate_pose(&calibration, &corners, 150).unwrap();
        assert!((pose.translation - truth.translation).length() < 2.0);
        assert!(pose.rotation.angle_between(truth.rotation) < 5e-3);
        assert!((pose.distance() - truth.distance()).abs() < 2.0);
    }

    #[test]
    fn test_degenerate_corners_have_no_pose() {
        let calibration = Calibration::pinhole((640, 480), 800.0);
        let corners = [Vec2::new(10.0, 10.0); 4];
        assert!(estimate_pose(&calibration, &corners, 250).is_none());
    }

    #[test]
    fn test_pose_is_lazy() {
        let calibration = Arc::new(Calibration::pinhole((640, 480), 800.0));
        let truth = Pose {
            translation: DVec3::new(0.0, 0.0, 800.0),
            rotation: DQuat::IDENTITY,
        };
        let corners = project(&calibration, &truth, 250);
        let marker = Marker::new(3, MarkerType::Apriltag36h11, 250, corners, Some(calibration));

        assert!(!marker.is_eager());
        assert!(marker.pose().is_some());
        assert!(marker.is_eager());
        assert!(marker.clone().into_eager().is_eager());
    }

    #[test]
    fn test_uncalibrated_marker_has_no_pose() {
        let corners = [
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        let marker = Marker::new(1, MarkerType::Apriltag16h5, 100, corners, None).into_eager();

        assert!(marker.pose().is_none());
        assert!(!marker.is_calibrated());
        assert_eq!(marker.pixel_centre(), Vec2::new(5.0, 5.0));
    }

    #[test]
    fn test_marker_sizes_overrides() {
        let sizes = MarkerSizes::fixed(100).with_override(0..100, 250);
        assert_eq!(sizes.size_of(0), 250);
        assert_eq!(sizes.size_of(99), 250);
        assert_eq!(sizes.size_of(100), 100);
    }

    #[test]
    fn test_marker_type_display_matches_serde_name() {
        let value = toml::Value::try_from(MarkerType::Aprilgrid36h11).unwrap();
        assert_eq!(value.as_str(), Some("aprilgrid_36h11"));
        assert_eq!(MarkerType::Aprilgrid36h11.to_string(), "aprilgrid_36h11");
    }

    proptest! {
        #[test]
        fn prop_ids_outside_overrides_use_default(
            default in 1u32..1000,
            start in 0u32..500,
            len in 1u32..500,
            id in 0u32..2000,
        ) {
            let sizes = MarkerSizes::fixed(default).with_override(start..start + len, default + 1);
            let expected = if (start..start + len).contains(&id) { default + 1 } else { default };
            prop_assert_eq!(sizes.size_of(id), expected);
        }
    }
}
