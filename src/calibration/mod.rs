//! Frame calibration: auto-zero drift correction and hot-pixel removal.

pub mod auto_zero;
pub mod hot_pixel;
pub mod pixel;

pub use auto_zero::{
    apply_adjustment, compute_adjustment, correct_frame, AutoZeroConfig, AutoZeroReport,
    ClampCounts, OverscanStats, ZeroAdjustment,
};
pub use hot_pixel::HotPixelMap;
pub use pixel::AdcPixel;
