//! Backend configuration.
//!
//! Selects the marker family, marker sizes and calibration used by the
//! hardware backends. Loadable from TOML:
//!
//! ```toml
//! marker_type = "apriltag_36h11"
//! marker_size = 100
//! calibration_file = "calibrations/c270.toml"
//!
//! [[marker_sizes]]
//! ids = [0, 100]
//! size = 250
//! ```

use crate::vision::{MarkerSizes, MarkerType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Side length used when no override matches, in millimetres.
pub const DEFAULT_MARKER_SIZE: u32 = 250;

/// Configuration shared by all hardware backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Marker family to detect.
    pub marker_type: MarkerType,
    /// Side length of markers in millimetres.
    pub marker_size: u32,
    /// Per-id size overrides, first match wins.
    pub marker_sizes: Vec<MarkerSizeOverride>,
    /// Camera calibration used for pose estimation.
    pub calibration_file: Option<PathBuf>,
}

/// Markers with ids in `ids[0]..ids[1]` have side length `size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSizeOverride {
    /// First id covered, then one past the last.
    pub ids: [u32; 2],
    /// Side length in millimetres.
    pub size: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            marker_type: MarkerType::Apriltag36h11,
            marker_size: DEFAULT_MARKER_SIZE,
            marker_sizes: Vec::new(),
            calibration_file: None,
        }
    }
}

impl BackendConfig {
    /// Creates a configuration for the given marker family.
    pub fn with_marker_type(marker_type: MarkerType) -> Self {
        Self {
            marker_type,
            ..Default::default()
        }
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_size == 0 {
            return Err(ConfigError::InvalidMarkerSize);
        }
        for size_override in &self.marker_sizes {
            let [start, end] = size_override.ids;
            if start >= end {
                return Err(ConfigError::InvalidIdRange(start, end));
            }
            if size_override.size == 0 {
                return Err(ConfigError::InvalidMarkerSize);
            }
        }
        Ok(())
    }

    /// Builds the marker size lookup.
    pub fn marker_sizes(&self) -> MarkerSizes {
        self.marker_sizes
            .iter()
            .fold(MarkerSizes::fixed(self.marker_size), |sizes, o| {
                sizes.with_override(o.ids[0]..o.ids[1], o.size)
            })
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: BackendConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A marker size of zero.
    #[error("marker sizes must be positive")]
    InvalidMarkerSize,
    /// An override range that covers no ids.
    #[error("invalid marker id range {0}..{1}")]
    InvalidIdRange(u32, u32),
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this configuration.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_valid() {
        let config = BackendConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.marker_type, MarkerType::Apriltag36h11);
        assert_eq!(config.marker_size, 250);
        assert!(config.calibration_file.is_none());
    }

    #[test]
    fn test_zero_marker_size_invalid() {
        let mut config = BackendConfig::default();
        config.marker_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMarkerSize)
        ));
    }

    #[test]
    fn test_empty_id_range_invalid() {
        let mut config = BackendConfig::default();
        config.marker_sizes.push(MarkerSizeOverride {
            ids: [10, 10],
            size: 100,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIdRange(10, 10))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
marker_type = "apriltag_16h5"
marker_size = 100

[[marker_sizes]]
ids = [0, 100]
size = 250
"#
        )
        .unwrap();

        let config = BackendConfig::from_file(file.path()).unwrap();
        assert_eq!(config.marker_type, MarkerType::Apriltag16h5);

        let sizes = config.marker_sizes();
        assert_eq!(sizes.size_of(42), 250);
        assert_eq!(sizes.size_of(100), 100);
    }

    #[test]
    fn test_unknown_marker_type_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "marker_type = \"qr\"\n").unwrap();
        assert!(matches!(
            BackendConfig::from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
