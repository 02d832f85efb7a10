//! Delivered image frames.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calibration::{AdcPixel, AutoZeroReport};
use crate::camera::error::CameraResult;
use crate::camera::types::ExposureSettings;

/// A calibrated frame, row-major.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image<P: AdcPixel> {
    pub columns: u16,
    pub rows: u16,
    #[serde(skip)]
    pub pixels: Vec<P>,
    /// Exposure the frame was taken with.
    pub exposure: ExposureSettings,
    pub captured_at: DateTime<Utc>,
    /// Auto-zero outcome, when auto-zero ran.
    pub auto_zero: Option<AutoZeroReport>,
    pub hot_pixels_corrected: usize,
}

impl<P: AdcPixel> Image<P> {
    pub fn pixel(&self, column: u16, row: u16) -> Option<P> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        self.pixels
            .get(row as usize * self.columns as usize + column as usize)
            .copied()
    }

    pub fn row(&self, row: u16) -> Option<&[P]> {
        if row >= self.rows {
            return None;
        }
        let width = self.columns as usize;
        let start = row as usize * width;
        self.pixels.get(start..start + width)
    }

    /// Minimum, maximum and mean pixel value.
    pub fn summary(&self) -> Option<(f64, f64, f64)> {
        if self.pixels.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        let mut sum = 0.0;
        for p in &self.pixels {
            let v = p.to_f64();
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Some((min, max, sum / self.pixels.len() as f64))
    }
}

impl Image<u16> {
    /// Write the pixels as raw little-endian 16-bit samples.
    pub fn write_raw_le(&self, path: &Path) -> CameraResult<()> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 2);
        for p in &self.pixels {
            bytes.extend_from_slice(&p.to_le_bytes());
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}
