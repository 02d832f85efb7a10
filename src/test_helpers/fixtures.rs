use std::time::Duration;

use crate::camera::config::DETAILS_STRING_LEN;
use crate::camera::packet::PayloadWriter;
use crate::camera::types::{DeviceDetails, ExposureSettings, FeatureFlags};

/// 3072 x 2048 camera with every optional feature.
pub fn sample_details() -> DeviceDetails {
    DeviceDetails {
        has_shutter: true,
        has_filter_wheel: true,
        has_relays: true,
        has_temp_regulation: true,
        columns: 3072,
        rows: 2048,
        pixel_width: 900,
        pixel_height: 900,
        max_hbin: 4,
        max_vbin: 4,
        asym_bin: true,
        num_filters: 5,
        features: FeatureFlags::from_bits(0x1F),
        model: "KAF-6303".to_string(),
        serial: "CCD0042".to_string(),
    }
}

/// Builder for test DeviceDetails instances.
pub struct DetailsBuilder {
    details: DeviceDetails,
}

impl DetailsBuilder {
    pub fn new() -> Self {
        Self {
            details: sample_details(),
        }
    }

    pub fn size(mut self, columns: u16, rows: u16) -> Self {
        self.details.columns = columns;
        self.details.rows = rows;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.details.features = features;
        self
    }

    pub fn no_auto_zero(mut self) -> Self {
        self.details.features.auto_zero = false;
        self
    }

    pub fn symmetric_binning_only(mut self) -> Self {
        self.details.asym_bin = false;
        self
    }

    pub fn build(self) -> DeviceDetails {
        self.details
    }
}

impl Default for DetailsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode details the way the camera sends them.
pub fn details_block(details: &DeviceDetails) -> Vec<u8> {
    let mut bytes = PayloadWriter::new()
        .bool(details.has_shutter)
        .bool(details.has_filter_wheel)
        .bool(details.has_relays)
        .bool(details.has_temp_regulation)
        .u16(details.columns)
        .u16(details.rows)
        .u16(details.pixel_width)
        .u16(details.pixel_height)
        .u8(details.max_hbin)
        .u8(details.max_vbin)
        .bool(details.asym_bin)
        .u8(details.num_filters)
        .u16(details.features.bits())
        .into_bytes();
    for text in [&details.model, &details.serial] {
        let mut field = text.as_bytes().to_vec();
        field.resize(DETAILS_STRING_LEN, 0);
        bytes.extend_from_slice(&field);
    }
    bytes
}

/// One-second unbinned full-frame exposure of the sample camera.
pub fn sample_exposure() -> ExposureSettings {
    ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(1))
}

/// Little-endian pixel stream of `count` copies of `value`.
pub fn pixel_stream(value: u16, count: usize) -> Vec<u8> {
    let [lo, hi] = value.to_le_bytes();
    let mut bytes = Vec::with_capacity(count * 2);
    for _ in 0..count {
        bytes.push(lo);
        bytes.push(hi);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_block_length() {
        assert_eq!(details_block(&sample_details()).len(), 82);
    }

    #[test]
    fn test_builder() {
        let details = DetailsBuilder::new().size(8, 4).no_auto_zero().build();
        assert_eq!((details.columns, details.rows), (8, 4));
        assert!(!details.features.auto_zero);
    }
}
