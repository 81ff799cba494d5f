//! Camera calibration files.
//!
//! Calibrations are stored as TOML:
//!
//! ```toml
//! resolution = [1280, 720]
//! camera_matrix = [
//!     [1000.0, 0.0, 640.0],
//!     [0.0, 1000.0, 360.0],
//!     [0.0, 0.0, 1.0],
//! ]
//! distortion_coefficients = [0.1, -0.2, 0.0, 0.0, 0.05]
//! ```
//!
//! Distortion coefficients follow the `k1, k2, p1, p2, k3` convention; missing
//! trailing terms are treated as zero.

use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Iterations used when removing lens distortion from a pixel.
const UNDISTORT_ITERATIONS: usize = 8;

/// Calibration loading and validation errors.
#[derive(Debug, Clone, Error)]
pub enum CalibrationError {
    /// The file could not be read.
    #[error("failed to read calibration file: {0}")]
    FileReadError(String),
    /// The file is not a valid TOML calibration.
    #[error("failed to parse calibration file: {0}")]
    ParseError(String),
    /// Width or height is zero.
    #[error("invalid calibration resolution")]
    InvalidResolution,
    /// A focal length is not positive.
    #[error("invalid camera matrix: focal lengths must be positive")]
    InvalidCameraMatrix,
    /// More than the five Brown-Conrady coefficients.
    #[error("too many distortion coefficients: {0} (at most 5)")]
    TooManyCoefficients(usize),
}

/// Intrinsic calibration of a single camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Resolution the calibration was taken at, `(width, height)`.
    pub resolution: (u32, u32),
    /// Row-major 3x3 intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// Brown-Conrady `k1, k2, p1, p2, k3`; missing terms are zero.
    #[serde(default)]
    pub distortion_coefficients: Vec<f64>,
}

impl Calibration {
    /// Builds an undistorted pinhole calibration.
    pub fn pinhole(resolution: (u32, u32), focal_length: f64) -> Self {
        let (w, h) = resolution;
        Self {
            resolution,
            camera_matrix: [
                [focal_length, 0.0, f64::from(w) / 2.0],
                [0.0, focal_length, f64::from(h) / 2.0],
                [0.0, 0.0, 1.0],
            ],
            distortion_coefficients: Vec::new(),
        }
    }

    /// Checks resolution, focal lengths and coefficient count.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.resolution.0 == 0 || self.resolution.1 == 0 {
            return Err(CalibrationError::InvalidResolution);
        }
        if !(self.fx() > 0.0 && self.fy() > 0.0) {
            return Err(CalibrationError::InvalidCameraMatrix);
        }
        if self.distortion_coefficients.len() > 5 {
            return Err(CalibrationError::TooManyCoefficients(
                self.distortion_coefficients.len(),
            ));
        }
        Ok(())
    }

    /// Horizontal focal length in pixels.
    #[inline]
    pub fn fx(&self) -> f64 {
        self.camera_matrix[0][0]
    }

    /// Vertical focal length in pixels.
    #[inline]
    pub fn fy(&self) -> f64 {
        self.camera_matrix[1][1]
    }

    /// Principal point x in pixels.
    #[inline]
    pub fn cx(&self) -> f64 {
        self.camera_matrix[0][2]
    }

    /// Principal point y in pixels.
    #[inline]
    pub fn cy(&self) -> f64 {
        self.camera_matrix[1][2]
    }

    fn coefficient(&self, index: usize) -> f64 {
        self.distortion_coefficients.get(index).copied().unwrap_or(0.0)
    }

    /// Maps a pixel to normalized image coordinates with distortion removed.
    pub fn normalize(&self, pixel: DVec2) -> DVec2 {
        let skew = self.camera_matrix[0][1];
        let y = (pixel.y - self.cy()) / self.fy();
        let x = (pixel.x - self.cx() - skew * y) / self.fx();
        let distorted = DVec2::new(x, y);

        if self.distortion_coefficients.iter().all(|&k| k == 0.0) {
            return distorted;
        }

        let (k1, k2, p1, p2, k3) = (
            self.coefficient(0),
            self.coefficient(1),
            self.coefficient(2),
            self.coefficient(3),
            self.coefficient(4),
        );

        // Fixed-point inversion of the Brown-Conrady model
        let mut p = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = p.length_squared();
            let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
            let dx = 2.0 * p1 * p.x * p.y + p2 * (r2 + 2.0 * p.x * p.x);
            let dy = p1 * (r2 + 2.0 * p.y * p.y) + 2.0 * p2 * p.x * p.y;
            p = DVec2::new((distorted.x - dx) / radial, (distorted.y - dy) / radial);
        }
        p
    }
}

/// Loads and validates a calibration file.
pub fn parse_calibration_file(path: impl AsRef<Path>) -> Result<Calibration, CalibrationError> {
    let content = std::fs::read_to_string(path.as_ref())
        .map_err(|e| CalibrationError::FileReadError(e.to_string()))?;
    let calibration: Calibration =
        toml::from_str(&content).map_err(|e| CalibrationError::ParseError(e.to_string()))?;
    calibration.validate()?;
    tracing::debug!(
        path = %path.as_ref().display(),
        resolution = ?calibration.resolution,
        "loaded calibration"
    );
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
resolution = [1280, 720]
camera_matrix = [
    [1000.0, 0.0, 640.0],
    [0.0, 1000.0, 360.0],
    [0.0, 0.0, 1.0],
]
distortion_coefficients = [0.1, -0.05]
"#;

    #[test]
    fn test_parse_calibration_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let calibration = parse_calibration_file(file.path()).unwrap();
        assert_eq!(calibration.resolution, (1280, 720));
        assert_eq!(calibration.fx(), 1000.0);
        assert_eq!(calibration.cy(), 360.0);
        assert_eq!(calibration.distortion_coefficients, vec![0.1, -0.05]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            parse_calibration_file("/nonexistent/calibration.toml"),
            Err(CalibrationError::FileReadError(_))
        ));
    }

    #[test]
    fn test_zero_focal_length_invalid() {
        let mut calibration = Calibration::pinhole((640, 480), 500.0);
        calibration.camera_matrix[0][0] = 0.0;
        assert!(matches!(
            calibration.validate(),
            Err(CalibrationError::InvalidCameraMatrix)
        ));
    }

    #[test]
    fn test_normalize_principal_point() {
        let calibration = Calibration::pinhole((640, 480), 500.0);
        let p = calibration.normalize(DVec2::new(320.0, 240.0));
        assert!(p.length() < 1e-12);

        let q = calibration.normalize(DVec2::new(820.0, 240.0));
        assert!((q.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_inverts_radial_distortion() {
        let mut calibration = Calibration::pinhole((640, 480), 500.0);
        calibration.distortion_coefficients = vec![0.05];

        // Distort a known normalized point, then recover it
        let undistorted = DVec2::new(0.2, -0.1);
        let r2 = undistorted.length_squared();
        let distorted = undistorted * (1.0 + 0.05 * r2);
        let pixel = DVec2::new(distorted.x * 500.0 + 320.0, distorted.y * 500.0 + 240.0);

        let recovered = calibration.normalize(pixel);
        assert!((recovered - undistorted).length() < 1e-9);
    }
}
