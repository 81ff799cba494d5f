//! Marker Camera Board Library
//!
//! Exposes a fiducial-marker camera as a board within a small robotics
//! hardware abstraction layer. The camera detects AprilTag markers and,
//! given a calibration, estimates where they are relative to the camera.
//!
//! # Architecture
//!
//! ```text
//! Backend::discover → MarkerCameraBoard → MarkerCamera → MarkerCameraInterface
//!                                                              ↓
//!                                                       vision::Camera
//! ```
//!
//! - [`framework`]: Backend / Board / Component contracts and board groups
//! - [`vision`]: capture, detection, calibration and pose estimation
//! - [`component`], [`board`], [`backends`]: the marker camera board itself
//!
//! Errors from the vision layer pass through every adapter layer unchanged.
//!
//! # Example
//!
//! ```no_run
//! use marker_board::{
//!     backends::{HardwareContext, SingleHardwareBackend},
//!     framework::BoardGroup,
//!     vision::MockDriver,
//!     BackendConfig,
//! };
//!
//! let context = HardwareContext::new(BackendConfig::default(), MockDriver::new([0]));
//! let mut cameras =
//!     BoardGroup::discover::<SingleHardwareBackend<MockDriver>>(&context).unwrap();
//! let camera = cameras.singular().unwrap();
//!
//! for marker in camera.see(true, None).unwrap() {
//!     println!("{marker}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod backends;
pub mod board;
pub mod component;
pub mod config;
pub mod framework;
pub mod vision;

// Re-export commonly used types at crate root
pub use backends::{HardwareBackend, HardwareContext, SingleHardwareBackend};
pub use board::MarkerCameraBoard;
pub use component::{MarkerCamera, MarkerCameraInterface};
pub use config::{BackendConfig, ConfigError};
pub use vision::{Frame, Marker, MarkerType, VisionError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
