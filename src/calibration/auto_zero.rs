//! Auto-zero drift correction from the sensor's overscan row.
//!
//! The camera reads a row of light-shielded overscan pixels after each frame.
//! Their level drifts with temperature and time; shifting every image pixel so
//! the overscan statistic lands on the camera's target zero level removes the
//! drift.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pixel::AdcPixel;
use crate::camera::config::MAX_OVERSCAN_PIXELS;
use crate::camera::error::{CameraError, CameraResult};

/// Auto-zero configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoZeroConfig {
    pub enabled: bool,
    /// Lowest samples discarded before taking statistics.
    pub skip_start: usize,
    /// Highest samples discarded before taking statistics.
    pub skip_end: usize,
    /// Use the median rather than the mean.
    pub use_median: bool,
    /// Overscan level above which the frame is treated as saturated.
    pub saturation_threshold: u16,
    pub max_adu: u16,
}

impl Default for AutoZeroConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_start: 2,
            skip_end: 0,
            use_median: true,
            saturation_threshold: 60_000,
            max_adu: u16::MAX,
        }
    }
}

/// Statistics of the trimmed overscan samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverscanStats {
    pub samples: usize,
    pub median: f64,
    pub mean: f64,
}

impl OverscanStats {
    pub fn statistic(&self, use_median: bool) -> f64 {
        if use_median {
            self.median
        } else {
            self.mean
        }
    }
}

/// Correction to apply to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZeroAdjustment {
    /// Leave the frame untouched.
    Skip,
    /// Overscan is saturated; the whole frame is set to full scale.
    Saturate,
    /// Add this offset to every pixel.
    Offset(f64),
}

/// Pixels pinned to the ends of the ADC range while applying an offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClampCounts {
    pub low: usize,
    pub high: usize,
}

/// What auto-zero did to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoZeroReport {
    pub target: u16,
    pub stats: OverscanStats,
    pub adjustment: ZeroAdjustment,
    pub clamped: ClampCounts,
}

/// Sort and trim the overscan row, then compute median and mean.
pub fn overscan_stats(overscan: &[u16], config: &AutoZeroConfig) -> CameraResult<OverscanStats> {
    if overscan.is_empty() || overscan.len() > MAX_OVERSCAN_PIXELS {
        return Err(CameraError::calibration(format!(
            "overscan row has {} pixels, expected 1..={}",
            overscan.len(),
            MAX_OVERSCAN_PIXELS
        )));
    }

    let mut sorted = overscan.to_vec();
    sorted.sort_unstable();

    let end = sorted.len().saturating_sub(config.skip_end);
    if config.skip_start >= end {
        return Err(CameraError::calibration(format!(
            "skipping {} low and {} high samples leaves none of {}",
            config.skip_start,
            config.skip_end,
            overscan.len()
        )));
    }
    let kept = &sorted[config.skip_start..end];

    let n = kept.len();
    let median = if n % 2 == 1 {
        kept[n / 2] as f64
    } else {
        (kept[n / 2 - 1] as f64 + kept[n / 2] as f64) / 2.0
    };
    let mean = kept.iter().map(|&v| v as f64).sum::<f64>() / n as f64;

    Ok(OverscanStats {
        samples: n,
        median,
        mean,
    })
}

/// Decide the correction for a frame from its overscan row.
pub fn compute_adjustment(
    overscan: &[u16],
    target: u16,
    config: &AutoZeroConfig,
) -> CameraResult<(ZeroAdjustment, OverscanStats)> {
    let stats = overscan_stats(overscan, config)?;
    let statistic = stats.statistic(config.use_median);

    let adjustment = if statistic > config.saturation_threshold as f64 {
        ZeroAdjustment::Saturate
    } else if statistic == 0.0 {
        ZeroAdjustment::Skip
    } else {
        ZeroAdjustment::Offset(target as f64 - statistic)
    };

    debug!(
        samples = stats.samples,
        median = stats.median,
        mean = stats.mean,
        target,
        ?adjustment,
        "auto-zero"
    );
    Ok((adjustment, stats))
}

/// Apply a correction in place, clamping to `[0, max_adu]`.
pub fn apply_adjustment<P: AdcPixel>(
    pixels: &mut [P],
    adjustment: ZeroAdjustment,
    max_adu: u16,
) -> ClampCounts {
    let mut clamped = ClampCounts::default();
    let max = max_adu as f64;

    match adjustment {
        ZeroAdjustment::Skip => {}
        ZeroAdjustment::Saturate => {
            let full = P::from_clamped(max);
            pixels.iter_mut().for_each(|p| *p = full);
        }
        ZeroAdjustment::Offset(offset) => {
            let offset = if P::IS_INTEGER { offset.round() } else { offset };
            for pixel in pixels.iter_mut() {
                let value = pixel.to_f64() + offset;
                let value = if value < 0.0 {
                    clamped.low += 1;
                    0.0
                } else if value > max {
                    clamped.high += 1;
                    max
                } else {
                    value
                };
                *pixel = P::from_clamped(value);
            }
        }
    }

    if clamped.low > 0 {
        debug!(count = clamped.low, "auto-zero clamped pixels at zero");
    }
    clamped
}

/// Compute and apply auto-zero to a frame.
pub fn correct_frame<P: AdcPixel>(
    pixels: &mut [P],
    overscan: &[u16],
    target: u16,
    config: &AutoZeroConfig,
) -> CameraResult<AutoZeroReport> {
    let (adjustment, stats) = compute_adjustment(overscan, target, config)?;
    let clamped = apply_adjustment(pixels, adjustment, config.max_adu);
    Ok(AutoZeroReport {
        target,
        stats,
        adjustment,
        clamped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AutoZeroConfig {
        AutoZeroConfig::default()
    }

    #[test]
    fn test_median_after_skip() {
        // two lowest (outliers) dropped
        let overscan = [10, 12, 998, 997, 999, 998, 1000];
        let stats = overscan_stats(&overscan, &config()).unwrap();
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.median, 998.0);
        assert_eq!(stats.mean, 998.4);
    }

    #[test]
    fn test_even_count_median() {
        let cfg = AutoZeroConfig {
            skip_start: 0,
            ..config()
        };
        let stats = overscan_stats(&[100, 200, 300, 400], &cfg).unwrap();
        assert_eq!(stats.median, 250.0);
    }

    #[test]
    fn test_offset_applied_to_all_pixels() {
        let overscan = vec![998u16; 64];
        let mut pixels = vec![500u16, 1000, 65534];
        let report = correct_frame(&mut pixels, &overscan, 1000, &config()).unwrap();
        assert_eq!(report.adjustment, ZeroAdjustment::Offset(2.0));
        assert_eq!(pixels, vec![502, 1002, 65535]);
        assert_eq!(report.clamped, ClampCounts { low: 0, high: 1 });
    }

    #[test]
    fn test_noop_when_statistic_equals_target() {
        let overscan = vec![1000u16; 32];
        let original = vec![3u16, 1000, 40_000];
        let mut pixels = original.clone();
        let report = correct_frame(&mut pixels, &overscan, 1000, &config()).unwrap();
        assert_eq!(report.adjustment, ZeroAdjustment::Offset(0.0));
        assert_eq!(pixels, original);
    }

    #[test]
    fn test_zero_offset_still_clamps_to_max_adu() {
        let cfg = AutoZeroConfig {
            max_adu: 4095,
            ..config()
        };
        let mut level = vec![5000u16, 100];
        correct_frame(&mut level, &[1000; 16], 1000, &cfg).unwrap();
        assert_eq!(level, vec![4095, 100]);

        let mut shifted = vec![5000u16, 100];
        correct_frame(&mut shifted, &[999; 16], 1000, &cfg).unwrap();
        assert_eq!(shifted, vec![4095, 101]);
    }

    #[test]
    fn test_zero_statistic_skips() {
        let overscan = vec![0u16; 16];
        let mut pixels = vec![7u16, 8];
        let report = correct_frame(&mut pixels, &overscan, 1000, &config()).unwrap();
        assert_eq!(report.adjustment, ZeroAdjustment::Skip);
        assert_eq!(pixels, vec![7, 8]);
    }

    #[test]
    fn test_saturation_short_circuits() {
        let overscan = vec![61_000u16; 16];
        let mut pixels = vec![0u16, 12, 30_000];
        let report = correct_frame(&mut pixels, &overscan, 1000, &config()).unwrap();
        assert_eq!(report.adjustment, ZeroAdjustment::Saturate);
        assert!(pixels.iter().all(|&p| p == 65_535));
    }

    #[test]
    fn test_low_clamp_counted() {
        let overscan = vec![1100u16; 16];
        let mut pixels = vec![50i32, 2000];
        let report = correct_frame(&mut pixels, &overscan, 1000, &config()).unwrap();
        assert_eq!(pixels, vec![0, 1900]);
        assert_eq!(report.clamped.low, 1);
    }

    #[test]
    fn test_integer_types_round_offset() {
        let cfg = AutoZeroConfig {
            skip_start: 0,
            use_median: false,
            ..config()
        };
        // mean 998.5, offset 1.5
        let overscan = [998u16, 999];
        let mut ints = vec![100u16];
        correct_frame(&mut ints, &overscan, 1000, &cfg).unwrap();
        assert_eq!(ints, vec![102]);

        let mut floats = vec![100.0f64];
        correct_frame(&mut floats, &overscan, 1000, &cfg).unwrap();
        assert_eq!(floats, vec![101.5]);
    }

    #[test]
    fn test_skip_consuming_all_samples_is_error() {
        let cfg = AutoZeroConfig {
            skip_start: 3,
            skip_end: 1,
            ..config()
        };
        let err = overscan_stats(&[1, 2, 3, 4], &cfg).unwrap_err();
        assert!(matches!(err, CameraError::Calibration { .. }));
    }

    #[test]
    fn test_overscan_length_bounds() {
        assert!(overscan_stats(&[], &config()).is_err());
        let long = vec![1000u16; MAX_OVERSCAN_PIXELS + 1];
        assert!(overscan_stats(&long, &config()).is_err());
    }
}
