//! Typed views of the camera's wire structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{Command, DETAILS_STRING_LEN};
use super::error::{CameraError, CameraResult};
use super::packet::{PayloadReader, PayloadWriter};

// ============================================================================
// Exposure
// ============================================================================

/// External trigger behavior for an exposure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerMode {
    #[default]
    Disabled,
    /// Wait a short, firmware-defined time for the trigger edge.
    ShortWait,
    /// Wait indefinitely for the trigger edge.
    LongWait,
}

impl TriggerMode {
    pub fn code(self) -> u8 {
        match self {
            TriggerMode::Disabled => 0,
            TriggerMode::ShortWait => 1,
            TriggerMode::LongWait => 2,
        }
    }

    pub fn is_active(self) -> bool {
        self != TriggerMode::Disabled
    }
}

/// Signal edge the external trigger input reacts to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerPolarity {
    #[default]
    Rising,
    Falling,
}

/// Parameters of one exposure. Sub-frame offsets and sizes are in binned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureSettings {
    /// Exposure length in 10 ms units (24 bits on the wire).
    pub duration: u32,
    /// Additional 100 µs steps, 0-99.
    pub duration_usec: u8,
    pub column_offset: u16,
    pub row_offset: u16,
    pub columns: u16,
    pub rows: u16,
    pub bin_x: u8,
    pub bin_y: u8,
    pub open_shutter: bool,
    pub fast_readout: bool,
    pub trigger: TriggerMode,
    pub repeat_count: u16,
}

/// Largest duration representable in the 24-bit field.
const MAX_DURATION_UNITS: u32 = 0x00FF_FFFF;

impl ExposureSettings {
    /// Full-frame exposure at the given binning.
    pub fn full_frame(details: &DeviceDetails, bin_x: u8, bin_y: u8, exposure: Duration) -> Self {
        let bx = bin_x.max(1) as u16;
        let by = bin_y.max(1) as u16;
        let (duration, duration_usec) = split_duration(exposure);
        Self {
            duration,
            duration_usec,
            column_offset: 0,
            row_offset: 0,
            columns: details.columns / bx,
            rows: details.rows / by,
            bin_x: bin_x.max(1),
            bin_y: bin_y.max(1),
            open_shutter: true,
            fast_readout: false,
            trigger: TriggerMode::Disabled,
            repeat_count: 1,
        }
    }

    /// Exposure length as a `Duration`.
    pub fn exposure_time(&self) -> Duration {
        Duration::from_millis(self.duration as u64 * 10)
            + Duration::from_micros(self.duration_usec as u64 * 100)
    }

    pub fn set_exposure_time(&mut self, exposure: Duration) {
        let (duration, duration_usec) = split_duration(exposure);
        self.duration = duration;
        self.duration_usec = duration_usec;
    }

    /// Whether the sub-unit must be sent with the extended start command.
    pub fn needs_fine_timing(&self) -> bool {
        self.duration_usec > 0
    }

    pub fn subframe(&self) -> Subframe {
        Subframe {
            column_offset: self.column_offset,
            row_offset: self.row_offset,
            columns: self.columns,
            rows: self.rows,
            bin_x: self.bin_x,
            bin_y: self.bin_y,
        }
    }

    /// Pixel count the camera will stream for this exposure.
    pub fn pixel_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// 18-byte exposure block.
    pub fn encode(&self) -> PayloadWriter {
        PayloadWriter::new()
            .u24(self.duration.min(MAX_DURATION_UNITS))
            .u16(self.column_offset)
            .u16(self.row_offset)
            .u16(self.columns)
            .u16(self.rows)
            .u8(self.bin_x)
            .u8(self.bin_y)
            .bool(self.open_shutter)
            .bool(self.fast_readout)
            .u8(self.trigger.code())
            .u16(self.repeat_count)
    }

    /// 19-byte exposure block carrying the sub-unit.
    pub fn encode_extended(&self) -> PayloadWriter {
        self.encode().u8(self.duration_usec)
    }
}

fn split_duration(exposure: Duration) -> (u32, u8) {
    let total_steps = exposure.as_micros() / 100;
    let duration = (total_steps / 100).min(MAX_DURATION_UNITS as u128) as u32;
    let duration_usec = (total_steps % 100) as u8;
    (duration, duration_usec)
}

/// Active readout window, in binned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subframe {
    pub column_offset: u16,
    pub row_offset: u16,
    pub columns: u16,
    pub rows: u16,
    pub bin_x: u8,
    pub bin_y: u8,
}

impl Subframe {
    /// Buffer index of the physical pixel `(x, y)`, if it falls in the window.
    pub fn index_of(&self, x: u16, y: u16) -> Option<usize> {
        let bx = x / self.bin_x.max(1) as u16;
        let by = y / self.bin_y.max(1) as u16;
        if bx < self.column_offset || by < self.row_offset {
            return None;
        }
        let col = bx - self.column_offset;
        let row = by - self.row_offset;
        if col >= self.columns || row >= self.rows {
            return None;
        }
        Some(row as usize * self.columns as usize + col as usize)
    }
}

// ============================================================================
// Device details
// ============================================================================

/// Optional commands a camera's firmware supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub auto_zero: bool,
    pub external_trigger: bool,
    pub fast_readout: bool,
    pub shutter_state: bool,
    pub can_abort: bool,
}

impl FeatureFlags {
    const AUTO_ZERO: u16 = 1 << 0;
    const EXTERNAL_TRIGGER: u16 = 1 << 1;
    const FAST_READOUT: u16 = 1 << 2;
    const SHUTTER_STATE: u16 = 1 << 3;
    const CAN_ABORT: u16 = 1 << 4;

    pub fn from_bits(bits: u16) -> Self {
        Self {
            auto_zero: bits & Self::AUTO_ZERO != 0,
            external_trigger: bits & Self::EXTERNAL_TRIGGER != 0,
            fast_readout: bits & Self::FAST_READOUT != 0,
            shutter_state: bits & Self::SHUTTER_STATE != 0,
            can_abort: bits & Self::CAN_ABORT != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        let mut bits = 0;
        if self.auto_zero {
            bits |= Self::AUTO_ZERO;
        }
        if self.external_trigger {
            bits |= Self::EXTERNAL_TRIGGER;
        }
        if self.fast_readout {
            bits |= Self::FAST_READOUT;
        }
        if self.shutter_state {
            bits |= Self::SHUTTER_STATE;
        }
        if self.can_abort {
            bits |= Self::CAN_ABORT;
        }
        bits
    }
}

/// Static camera capabilities, fetched once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub has_shutter: bool,
    pub has_filter_wheel: bool,
    pub has_relays: bool,
    pub has_temp_regulation: bool,
    pub columns: u16,
    pub rows: u16,
    /// Pixel width in 10 nm units.
    pub pixel_width: u16,
    /// Pixel height in 10 nm units.
    pub pixel_height: u16,
    pub max_hbin: u8,
    pub max_vbin: u8,
    pub asym_bin: bool,
    pub num_filters: u8,
    pub features: FeatureFlags,
    pub model: String,
    pub serial: String,
}

impl DeviceDetails {
    pub(crate) fn decode(body: &[u8]) -> CameraResult<Self> {
        let mut r = PayloadReader::new(Command::GetDeviceDetails, body);
        Ok(Self {
            has_shutter: r.bool()?,
            has_filter_wheel: r.bool()?,
            has_relays: r.bool()?,
            has_temp_regulation: r.bool()?,
            columns: r.u16()?,
            rows: r.u16()?,
            pixel_width: r.u16()?,
            pixel_height: r.u16()?,
            max_hbin: r.u8()?,
            max_vbin: r.u8()?,
            asym_bin: r.bool()?,
            num_filters: r.u8()?,
            features: FeatureFlags::from_bits(r.u16()?),
            model: r.string(DETAILS_STRING_LEN)?,
            serial: r.string(DETAILS_STRING_LEN)?,
        })
    }

    /// Pixel size in micrometres (width, height).
    pub fn pixel_size_um(&self) -> (f64, f64) {
        (
            self.pixel_width as f64 / 100.0,
            self.pixel_height as f64 / 100.0,
        )
    }

    /// Check a binning mode against this camera's limits.
    ///
    /// Some camera models accept 1x2 binning without advertising asymmetric
    /// binning; `allow_1x2` keeps that mode available.
    pub fn validate_binning(&self, bin_x: u8, bin_y: u8, allow_1x2: bool) -> CameraResult<()> {
        if bin_x == 0 || bin_y == 0 {
            return Err(CameraError::invalid("binning factors must be at least 1"));
        }
        if bin_x > self.max_hbin || bin_y > self.max_vbin {
            return Err(CameraError::invalid(format!(
                "binning {}x{} exceeds camera maximum {}x{}",
                bin_x, bin_y, self.max_hbin, self.max_vbin
            )));
        }
        if bin_x != bin_y && !self.asym_bin && !(allow_1x2 && bin_x == 1 && bin_y == 2) {
            return Err(CameraError::invalid(format!(
                "asymmetric binning {}x{} not supported",
                bin_x, bin_y
            )));
        }
        Ok(())
    }

    /// Check that an exposure's sub-frame fits inside the binned array.
    pub fn validate_subframe(&self, exposure: &ExposureSettings) -> CameraResult<()> {
        let max_cols = self.columns as u32 / exposure.bin_x.max(1) as u32;
        let max_rows = self.rows as u32 / exposure.bin_y.max(1) as u32;
        if exposure.columns == 0 || exposure.rows == 0 {
            return Err(CameraError::invalid("sub-frame is empty"));
        }
        if exposure.column_offset as u32 + exposure.columns as u32 > max_cols
            || exposure.row_offset as u32 + exposure.rows as u32 > max_rows
        {
            return Err(CameraError::invalid(format!(
                "sub-frame {}+{} x {}+{} outside binned array {}x{}",
                exposure.column_offset,
                exposure.columns,
                exposure.row_offset,
                exposure.rows,
                max_cols,
                max_rows
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Auto-zero
// ============================================================================

/// Auto-zero parameters reported by the camera for the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoZeroData {
    pub enabled: bool,
    /// Level the overscan median should be shifted to.
    pub zero_level: u16,
    /// Overscan pixels that follow the response.
    pub pixel_count: u16,
}

impl AutoZeroData {
    pub(crate) fn decode(body: &[u8]) -> CameraResult<Self> {
        let mut r = PayloadReader::new(Command::GetAutoZero, body);
        Ok(Self {
            enabled: r.bool()?,
            zero_level: r.u16()?,
            pixel_count: r.u16()?,
        })
    }
}

// ============================================================================
// Advanced settings
// ============================================================================

/// Requested amplifier gain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GainMode {
    High,
    Low,
    /// High gain unbinned, low gain when binning.
    #[default]
    Auto,
}

/// Gain actually applied on the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraGain {
    High,
    Low,
}

impl CameraGain {
    pub fn code(self) -> u8 {
        match self {
            CameraGain::High => 0,
            CameraGain::Low => 1,
        }
    }
}

/// Gain for a requested mode at the given binning.
pub fn resolve_gain(mode: GainMode, bin_x: u8, bin_y: u8) -> CameraGain {
    match mode {
        GainMode::High => CameraGain::High,
        GainMode::Low => CameraGain::Low,
        GainMode::Auto if bin_x <= 1 && bin_y <= 1 => CameraGain::High,
        GainMode::Auto => CameraGain::Low,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FanMode {
    Off,
    Low,
    Medium,
    #[default]
    High,
}

impl FanMode {
    fn code(self) -> u8 {
        match self {
            FanMode::Off => 0,
            FanMode::Low => 1,
            FanMode::Medium => 2,
            FanMode::High => 3,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => FanMode::Off,
            1 => FanMode::Low,
            2 => FanMode::Medium,
            _ => FanMode::High,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShutterPriority {
    #[default]
    Mechanical,
    Electronic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadoutSpeed {
    #[default]
    Normal,
    Fast,
}

/// Camera-side advanced settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdvancedSettings {
    pub led_enabled: bool,
    pub gain: GainMode,
    pub fan: FanMode,
    pub anti_blooming: bool,
    pub preflash: bool,
    pub shutter_priority: ShutterPriority,
    pub readout_speed: ReadoutSpeed,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            led_enabled: true,
            gain: GainMode::Auto,
            fan: FanMode::High,
            anti_blooming: false,
            preflash: false,
            shutter_priority: ShutterPriority::Mechanical,
            readout_speed: ReadoutSpeed::Normal,
        }
    }
}

impl AdvancedSettings {
    /// 7-byte advanced block with the gain already resolved.
    pub fn encode(&self, gain: CameraGain) -> PayloadWriter {
        PayloadWriter::new()
            .bool(self.led_enabled)
            .u8(gain.code())
            .u8(self.fan.code())
            .bool(self.anti_blooming)
            .bool(self.preflash)
            .u8(match self.shutter_priority {
                ShutterPriority::Mechanical => 0,
                ShutterPriority::Electronic => 1,
            })
            .u8(match self.readout_speed {
                ReadoutSpeed::Normal => 0,
                ReadoutSpeed::Fast => 1,
            })
    }

    pub(crate) fn decode(body: &[u8]) -> CameraResult<Self> {
        let mut r = PayloadReader::new(Command::GetAdvancedDefaults, body);
        Ok(Self {
            led_enabled: r.bool()?,
            gain: if r.u8()? == 0 { GainMode::High } else { GainMode::Low },
            fan: FanMode::from_code(r.u8()?),
            anti_blooming: r.bool()?,
            preflash: r.bool()?,
            shutter_priority: if r.u8()? == 0 {
                ShutterPriority::Mechanical
            } else {
                ShutterPriority::Electronic
            },
            readout_speed: if r.u8()? == 0 {
                ReadoutSpeed::Normal
            } else {
                ReadoutSpeed::Fast
            },
        })
    }
}

// ============================================================================
// Sensor specs and cooling
// ============================================================================

/// Sensor characteristics for the currently applied gain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcdSpecs {
    pub min_exposure: Duration,
    pub max_exposure: Duration,
    pub electrons_per_adu_high: f64,
    pub electrons_per_adu_low: f64,
    pub full_well: u32,
    pub max_adu: u16,
}

impl CcdSpecs {
    pub(crate) fn decode(body: &[u8]) -> CameraResult<Self> {
        let mut r = PayloadReader::new(Command::GetCcdSpecs, body);
        Ok(Self {
            min_exposure: Duration::from_micros(r.u24()? as u64 * 100),
            max_exposure: Duration::from_millis(r.u24()? as u64 * 10),
            electrons_per_adu_high: r.u16()? as f64 / 1000.0,
            electrons_per_adu_low: r.u16()? as f64 / 1000.0,
            full_well: r.u24()?,
            max_adu: r.u16()?,
        })
    }

    pub fn electrons_per_adu(&self, gain: CameraGain) -> f64 {
        match gain {
            CameraGain::High => self.electrons_per_adu_high,
            CameraGain::Low => self.electrons_per_adu_low,
        }
    }

    pub fn validate_exposure(&self, exposure: Duration) -> CameraResult<()> {
        if exposure < self.min_exposure || exposure > self.max_exposure {
            return Err(CameraError::invalid(format!(
                "exposure {:?} outside camera range {:?}..={:?}",
                exposure, self.min_exposure, self.max_exposure
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoolerState {
    Off,
    RampingToSetpoint,
    AtSetpoint,
    RampingToAmbient,
    AtAmbient,
    Shutdown,
    Unknown(u8),
}

impl CoolerState {
    fn from_code(code: u8) -> Self {
        match code {
            0 => CoolerState::Off,
            1 => CoolerState::RampingToSetpoint,
            2 => CoolerState::AtSetpoint,
            3 => CoolerState::RampingToAmbient,
            4 => CoolerState::AtAmbient,
            5 => CoolerState::Shutdown,
            other => CoolerState::Unknown(other),
        }
    }
}

/// Cooler readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoolerStatus {
    pub state: CoolerState,
    pub ccd_celsius: f64,
    pub ambient_celsius: f64,
    pub power_percent: f64,
}

impl CoolerStatus {
    pub(crate) fn decode(body: &[u8]) -> CameraResult<Self> {
        let mut r = PayloadReader::new(Command::GetTemperature, body);
        Ok(Self {
            state: CoolerState::from_code(r.u8()?),
            ccd_celsius: r.i16()? as f64 / 100.0,
            ambient_celsius: r.i16()? as f64 / 100.0,
            power_percent: r.u16()? as f64 / 100.0,
        })
    }
}

/// Setpoint in hundredths of a degree, clamped to the wire range.
pub(crate) fn centi_celsius(celsius: f64) -> i16 {
    (celsius * 100.0)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

// ============================================================================
// Filter wheel, relays and shutter
// ============================================================================

/// One filter wheel slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSlot {
    pub name: String,
    /// Position trim in motor steps.
    #[serde(default)]
    pub trim: i16,
}

/// Guide relay pulse lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPulse {
    pub x_plus: Duration,
    pub x_minus: Duration,
    pub y_plus: Duration,
    pub y_minus: Duration,
}

impl RelayPulse {
    pub fn encode(&self) -> PayloadWriter {
        let units = |d: Duration| (d.as_millis() / 10).min(u16::MAX as u128) as u16;
        PayloadWriter::new()
            .u16(units(self.x_plus))
            .u16(units(self.x_minus))
            .u16(units(self.y_plus))
            .u16(units(self.y_minus))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShutterState {
    Closed,
    Open,
    Moving,
}

impl ShutterState {
    pub(crate) fn from_code(code: u8) -> Self {
        match code {
            0 => ShutterState::Closed,
            1 => ShutterState::Open,
            _ => ShutterState::Moving,
        }
    }
}
