//! Output pixel representations.
//!
//! The camera always streams 16-bit samples. Callers choose how they want the
//! calibrated frame delivered: native `u16`, a signed wide `i32`, or `f64`.

/// Pixel type a calibrated frame can be delivered in.
pub trait AdcPixel: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// Integer types round calibration offsets before applying them.
    const IS_INTEGER: bool;

    fn from_raw(raw: u16) -> Self;

    fn to_f64(self) -> f64;

    /// Convert a value already clamped to the ADC range.
    fn from_clamped(value: f64) -> Self;
}

impl AdcPixel for u16 {
    const IS_INTEGER: bool = true;

    fn from_raw(raw: u16) -> Self {
        raw
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_clamped(value: f64) -> Self {
        value.round() as u16
    }
}

impl AdcPixel for i32 {
    const IS_INTEGER: bool = true;

    fn from_raw(raw: u16) -> Self {
        raw as i32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_clamped(value: f64) -> Self {
        value.round() as i32
    }
}

impl AdcPixel for f64 {
    const IS_INTEGER: bool = false;

    fn from_raw(raw: u16) -> Self {
        raw as f64
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_clamped(value: f64) -> Self {
        value
    }
}

/// Convert a raw sample buffer into the requested pixel type.
pub fn convert_raw<P: AdcPixel>(raw: &[u16]) -> Vec<P> {
    raw.iter().map(|&v| P::from_raw(v)).collect()
}
