//! Static hot-pixel correction.
//!
//! A hot-pixel map lists known-defective sensor sites in physical (unbinned)
//! coordinates. Before a frame is delivered, every listed site that falls in
//! the active sub-frame is overwritten with a neutral value.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pixel::AdcPixel;
use crate::camera::error::CameraResult;
use crate::camera::types::Subframe;

/// Hot-pixel map for one camera sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotPixelMap {
    /// Sensor model name
    pub sensor_model: String,

    /// Camera serial number
    pub camera_serial: String,

    /// Hot pixel coordinates (x, y), unbinned
    pub pixels: Vec<(u16, u16)>,
}

impl HotPixelMap {
    pub fn new(sensor_model: impl Into<String>, camera_serial: impl Into<String>) -> Self {
        Self {
            sensor_model: sensor_model.into(),
            camera_serial: camera_serial.into(),
            pixels: Vec::new(),
        }
    }

    /// Add a hot pixel, ignoring duplicates.
    pub fn add_pixel(&mut self, x: u16, y: u16) {
        if !self.pixels.contains(&(x, y)) {
            self.pixels.push((x, y));
        }
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Whether this map was made for the given camera.
    pub fn matches_camera(&self, serial: &str) -> bool {
        self.camera_serial.is_empty() || self.camera_serial == serial
    }

    /// Overwrite every mapped pixel inside `subframe` with `fill`.
    ///
    /// Several physical sites can bin into the same output pixel; each output
    /// pixel is counted once. Returns the number of pixels overwritten.
    pub fn apply<P: AdcPixel>(&self, subframe: &Subframe, buffer: &mut [P], fill: P) -> usize {
        let mut touched = HashSet::new();
        for &(x, y) in &self.pixels {
            if let Some(index) = subframe.index_of(x, y) {
                if let Some(pixel) = buffer.get_mut(index) {
                    *pixel = fill;
                    touched.insert(index);
                }
            }
        }
        debug!(
            mapped = self.pixels.len(),
            corrected = touched.len(),
            "hot-pixel correction"
        );
        touched.len()
    }

    /// Save to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> CameraResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from a JSON file.
    pub fn load_from_file(path: &Path) -> CameraResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
