//! Protocol engine and frame calibration for scientific CCD cameras.

pub mod calibration;
pub mod camera;
pub mod image;
pub mod settings;

#[cfg(test)]
mod test_helpers;

pub use camera::{Camera, CameraError, CameraResult, DeviceIdentity, ExposureSettings};
pub use image::Image;
pub use settings::{CameraSettings, SettingsManager};
