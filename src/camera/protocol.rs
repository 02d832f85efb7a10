//! Camera command engine.
//!
//! [`CameraProtocol`] turns capability calls into packet exchanges and keeps
//! the per-connection cache the commands depend on: device details, the
//! advanced settings and gain last applied, sensor specs, the last exposure
//! and the trigger mode it armed.
//!
//! Image acquisition runs as:
//! 1. `start_exposure` - validate, apply gain if it changed, start
//! 2. `camera_state` / `wait_for_idle` - poll until the frame is ready
//! 3. `transfer_image` - stream pixels, fetch overscan, calibrate

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::config::{Command, MAX_OVERSCAN_PIXELS};
use super::device::DeviceIdentity;
use super::error::{CameraError, CameraResult};
use super::framer::{ExchangeOptions, PacketFramer, TimeoutClass};
use super::packet::{decode_pixels, Packet, PayloadReader, PayloadWriter};
use super::state::CameraState;
use super::transport::CameraTransport;
use super::types::{
    centi_celsius, resolve_gain, AdvancedSettings, AutoZeroData, CameraGain, CcdSpecs,
    CoolerStatus, DeviceDetails, ExposureSettings, RelayPulse, ShutterState, TriggerMode,
    TriggerPolarity,
};
use crate::calibration::pixel::convert_raw;
use crate::calibration::{correct_frame, AdcPixel, HotPixelMap};
use crate::image::Image;
use crate::settings::CameraSettings;

/// Command engine for one camera connection.
pub struct CameraProtocol<T: CameraTransport> {
    framer: PacketFramer<T>,
    settings: CameraSettings,
    identity: Option<DeviceIdentity>,
    details: Option<DeviceDetails>,
    applied_advanced: Option<AdvancedSettings>,
    applied_gain: Option<CameraGain>,
    specs: Option<CcdSpecs>,
    last_exposure: Option<ExposureSettings>,
    trigger: TriggerMode,
    last_state: Option<CameraState>,
    fine_timing: Option<bool>,
    hot_pixels: Option<HotPixelMap>,
}

impl<T: CameraTransport> CameraProtocol<T> {
    pub fn new(transport: T, settings: CameraSettings) -> Self {
        Self {
            framer: PacketFramer::new(transport, settings.timeouts),
            settings,
            identity: None,
            details: None,
            applied_advanced: None,
            applied_gain: None,
            specs: None,
            last_exposure: None,
            trigger: TriggerMode::Disabled,
            last_state: None,
            fine_timing: None,
            hot_pixels: None,
        }
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the transport (unless the selector already did), initialize the
    /// camera and read its details.
    ///
    /// Any failure after the transport opened closes it again before the
    /// error is returned.
    pub fn connect(&mut self, identity: &DeviceIdentity) -> CameraResult<DeviceDetails> {
        self.invalidate();
        if !self.framer.transport().is_open() {
            self.framer.transport_mut().open(identity)?;
        }

        match self.initialize() {
            Ok(details) => {
                info!(
                    camera = %identity,
                    model = %details.model,
                    serial = %details.serial,
                    "camera connected"
                );
                self.identity = Some(identity.clone());
                Ok(details)
            }
            Err(e) => {
                warn!(camera = %identity, error = %e, "camera initialization failed");
                self.framer.transport_mut().close();
                self.invalidate();
                Err(e)
            }
        }
    }

    fn initialize(&mut self) -> CameraResult<DeviceDetails> {
        self.framer.apply_normal_timeouts()?;
        self.init()?;
        self.refresh_details()
    }

    /// Close the transport and drop every cached value.
    pub fn disconnect(&mut self) {
        if self.framer.transport().is_open() {
            self.framer.transport_mut().close();
            info!("camera disconnected");
        }
        self.identity = None;
        self.invalidate();
    }

    /// Close and reopen the current connection.
    pub fn reconnect(&mut self) -> CameraResult<DeviceDetails> {
        let identity = self.identity.clone().ok_or(CameraError::NotConnected)?;
        self.disconnect();
        self.connect(&identity)
    }

    pub fn is_connected(&self) -> bool {
        self.framer.transport().is_open()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    fn invalidate(&mut self) {
        self.details = None;
        self.applied_advanced = None;
        self.applied_gain = None;
        self.specs = None;
        self.last_exposure = None;
        self.trigger = TriggerMode::Disabled;
        self.last_state = None;
        self.fine_timing = None;
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Replace the runtime settings. Advanced settings are re-sent before the
    /// next exposure if they changed.
    pub fn set_settings(&mut self, settings: CameraSettings) -> CameraResult<()> {
        self.framer.set_timeouts(settings.timeouts);
        self.settings = settings;
        if self.is_connected() {
            self.framer.apply_normal_timeouts()?;
        }
        Ok(())
    }

    pub fn set_hot_pixel_map(&mut self, map: Option<HotPixelMap>) {
        if let (Some(map), Some(details)) = (&map, &self.details) {
            if !map.matches_camera(&details.serial) {
                warn!(
                    map_serial = %map.camera_serial,
                    camera_serial = %details.serial,
                    "hot-pixel map was made for a different camera"
                );
            }
        }
        self.hot_pixels = map;
    }

    pub fn hot_pixel_map(&self) -> Option<&HotPixelMap> {
        self.hot_pixels.as_ref()
    }

    // ========================================================================
    // Exchange helpers
    // ========================================================================

    fn transact(
        &mut self,
        command: Command,
        payload: PayloadWriter,
        options: ExchangeOptions,
    ) -> CameraResult<Vec<u8>> {
        if !self.framer.transport().is_open() {
            return Err(CameraError::NotConnected);
        }
        let request = Packet::with_payload(command, payload)?;
        let response = self.framer.exchange(&request, options)?;
        response.into_body(command)
    }

    fn simple(&mut self, command: Command) -> CameraResult<Vec<u8>> {
        self.transact(command, PayloadWriter::new(), ExchangeOptions::default())
    }

    fn with_payload(&mut self, command: Command, payload: PayloadWriter) -> CameraResult<()> {
        self.transact(command, payload, ExchangeOptions::default())?;
        Ok(())
    }

    fn read_flag(&mut self, command: Command) -> CameraResult<bool> {
        let body = self.simple(command)?;
        PayloadReader::new(command, &body).bool()
    }

    fn details_ref(&mut self) -> CameraResult<&DeviceDetails> {
        if self.details.is_none() {
            self.refresh_details()?;
        }
        self.details.as_ref().ok_or(CameraError::NotConnected)
    }

    fn require(&mut self, supported: fn(&DeviceDetails) -> bool, what: &str) -> CameraResult<()> {
        if supported(self.details_ref()?) {
            Ok(())
        } else {
            Err(CameraError::invalid(format!("camera has no {}", what)))
        }
    }

    // ========================================================================
    // Identification
    // ========================================================================

    /// Initialize the camera firmware.
    pub fn init(&mut self) -> CameraResult<()> {
        let policy = self.settings.connect_retry;
        policy.run_any("init", || self.simple(Command::Init).map(|_| ()))
    }

    /// Device details, fetched on first use and cached for the connection.
    pub fn device_details(&mut self) -> CameraResult<DeviceDetails> {
        self.details_ref().cloned()
    }

    /// Fetch device details again, replacing the cache.
    pub fn refresh_details(&mut self) -> CameraResult<DeviceDetails> {
        let body = self.simple(Command::GetDeviceDetails)?;
        let details = DeviceDetails::decode(&body)?;
        debug!(
            columns = details.columns,
            rows = details.rows,
            features = details.features.bits(),
            "device details"
        );
        self.details = Some(details.clone());
        Ok(details)
    }

    /// Sensor specs for the currently applied gain.
    pub fn ccd_specs(&mut self) -> CameraResult<CcdSpecs> {
        if let Some(specs) = self.specs {
            return Ok(specs);
        }
        self.refresh_specs()
    }

    fn refresh_specs(&mut self) -> CameraResult<CcdSpecs> {
        let body = self.simple(Command::GetCcdSpecs)?;
        let specs = CcdSpecs::decode(&body)?;
        self.specs = Some(specs);
        Ok(specs)
    }

    // ========================================================================
    // Advanced settings and gain
    // ========================================================================

    /// Factory advanced settings reported by the camera.
    pub fn advanced_defaults(&mut self) -> CameraResult<AdvancedSettings> {
        let body = self.simple(Command::GetAdvancedDefaults)?;
        AdvancedSettings::decode(&body)
    }

    /// Send advanced settings with an explicit gain, then refresh sensor specs.
    pub fn send_advanced_settings(
        &mut self,
        advanced: AdvancedSettings,
        gain: CameraGain,
    ) -> CameraResult<()> {
        self.with_payload(Command::SendAdvancedSettings, advanced.encode(gain))?;
        self.applied_advanced = Some(advanced);
        self.applied_gain = Some(gain);
        debug!(?gain, "advanced settings applied");
        self.refresh_specs()?;
        Ok(())
    }

    /// Store new advanced settings and apply them now.
    pub fn configure_advanced(&mut self, advanced: AdvancedSettings) -> CameraResult<()> {
        self.settings.advanced = advanced;
        let (bin_x, bin_y) = self
            .last_exposure
            .map(|e| (e.bin_x, e.bin_y))
            .unwrap_or((1, 1));
        self.send_advanced_settings(advanced, resolve_gain(advanced.gain, bin_x, bin_y))
    }

    /// Gain last sent to the camera.
    pub fn applied_gain(&self) -> Option<CameraGain> {
        self.applied_gain
    }

    /// Resolve the gain for a binning and send settings only if it changed.
    fn ensure_gain(&mut self, bin_x: u8, bin_y: u8) -> CameraResult<()> {
        let advanced = self.settings.advanced;
        let gain = resolve_gain(advanced.gain, bin_x, bin_y);
        if self.applied_gain == Some(gain) && self.applied_advanced == Some(advanced) {
            return Ok(());
        }
        self.send_advanced_settings(advanced, gain)
    }

    // ========================================================================
    // Exposure
    // ========================================================================

    fn validate_exposure(&mut self, exposure: &ExposureSettings) -> CameraResult<()> {
        let allow_1x2 = self.settings.allow_1x2_binning;
        let details = self.details_ref()?;
        details.validate_binning(exposure.bin_x, exposure.bin_y, allow_1x2)?;
        details.validate_subframe(exposure)?;
        if exposure.fast_readout && !details.features.fast_readout {
            return Err(CameraError::invalid("camera has no fast readout"));
        }
        if exposure.trigger.is_active() && !details.features.external_trigger {
            return Err(CameraError::invalid("camera has no external trigger"));
        }
        if let Some(specs) = self.specs {
            specs.validate_exposure(exposure.exposure_time())?;
        }
        Ok(())
    }

    /// Start an exposure.
    ///
    /// Settings are validated before anything is sent. The acknowledgement
    /// timeout is stretched by the exposure length.
    pub fn start_exposure(&mut self, exposure: ExposureSettings) -> CameraResult<()> {
        self.validate_exposure(&exposure)?;
        self.ensure_gain(exposure.bin_x, exposure.bin_y)?;

        let (command, payload) = if exposure.needs_fine_timing() && self.supports_fine_timing() {
            (Command::StartExposureEx, exposure.encode_extended())
        } else {
            if exposure.needs_fine_timing() {
                debug!(
                    sub_unit = exposure.duration_usec,
                    "firmware lacks fine exposure timing, sub-unit dropped"
                );
            }
            (Command::StartExposure, exposure.encode())
        };

        let options = ExchangeOptions::default()
            .with_timeout(TimeoutClass::Long(exposure.exposure_time()));
        self.transact(command, payload, options)?;

        info!(
            duration_ms = exposure.exposure_time().as_millis() as u64,
            columns = exposure.columns,
            rows = exposure.rows,
            bin_x = exposure.bin_x,
            bin_y = exposure.bin_y,
            "exposure started"
        );
        self.trigger = exposure.trigger;
        self.last_exposure = Some(exposure);
        Ok(())
    }

    pub fn abort_exposure(&mut self) -> CameraResult<()> {
        self.simple(Command::AbortExposure)?;
        info!("exposure aborted");
        Ok(())
    }

    /// Whether the exposure in progress can be aborted.
    pub fn can_abort_exposure(&mut self) -> CameraResult<bool> {
        if !self.details_ref()?.features.can_abort {
            return Ok(false);
        }
        self.read_flag(Command::CanAbortExposure)
    }

    /// Last exposure sent on this connection.
    pub fn last_exposure(&self) -> Option<ExposureSettings> {
        self.last_exposure
    }

    /// Probe for the extended start command. Any failure means unsupported;
    /// the answer is cached for the connection.
    pub fn supports_fine_timing(&mut self) -> bool {
        if let Some(known) = self.fine_timing {
            return known;
        }
        let options = ExchangeOptions::default().with_timeout(TimeoutClass::Short);
        let probe = self.transact(Command::ProbeExposureTiming, PayloadWriter::new(), options);
        let supported = match probe {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "fine exposure timing probe failed");
                false
            }
        };
        self.fine_timing = Some(supported);
        supported
    }

    // ========================================================================
    // Acquisition state
    // ========================================================================

    fn poll_state(&mut self) -> CameraResult<CameraState> {
        let policy = self.settings.connect_retry;
        let body = policy.run_any("get device state", || self.simple(Command::GetDeviceState))?;
        let flags = PayloadReader::new(Command::GetDeviceState, &body).u8()?;
        Ok(CameraState::from_flags(flags))
    }

    /// Poll the camera's state.
    ///
    /// While an external trigger wait is armed, an `Error` state is the
    /// firmware's trigger timeout: it is cleared and the state polled once
    /// more.
    pub fn camera_state(&mut self) -> CameraResult<CameraState> {
        let mut state = self.poll_state()?;
        if state == CameraState::Error && self.trigger.is_active() {
            info!(trigger = ?self.trigger, "trigger wait timed out, clearing");
            self.clear_trigger_error()?;
            state = self.poll_state()?;
        }
        if self.last_state != Some(state) {
            debug!(%state, "camera state");
        }
        self.last_state = Some(state);
        Ok(state)
    }

    /// State seen by the most recent poll.
    pub fn last_state(&self) -> Option<CameraState> {
        self.last_state
    }

    /// Poll until the camera leaves its busy states.
    pub fn wait_for_idle(&mut self, poll: Duration, timeout: Duration) -> CameraResult<CameraState> {
        let start = Instant::now();
        loop {
            let state = self.camera_state()?;
            if !state.is_busy() {
                return Ok(state);
            }
            if start.elapsed() >= timeout {
                return Err(CameraError::StateTimeout {
                    state,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(poll);
        }
    }

    // ========================================================================
    // Image transfer
    // ========================================================================

    /// Stream the finished frame, then calibrate it.
    ///
    /// Hot pixels are filled with the zero level when auto-zero was applied,
    /// otherwise with 0.
    pub fn transfer_image<P: AdcPixel>(&mut self) -> CameraResult<Image<P>> {
        let exposure = self
            .last_exposure
            .ok_or_else(|| CameraError::invalid("no exposure has been started"))?;

        self.transact(
            Command::TransferImage,
            PayloadWriter::new(),
            ExchangeOptions::streaming(),
        )?;
        let mut raw = vec![0u8; exposure.pixel_count() * 2];
        self.framer.read_stream(&mut raw)?;
        let mut pixels: Vec<P> = convert_raw(&decode_pixels(&raw));
        debug!(pixels = pixels.len(), "frame downloaded");

        let mut fill = 0u16;
        let mut auto_zero = None;
        let wants_auto_zero =
            self.settings.auto_zero.enabled && self.details_ref()?.features.auto_zero;
        if wants_auto_zero {
            let (data, overscan) = self.read_auto_zero()?;
            if data.enabled {
                fill = data.zero_level;
                auto_zero = Some(correct_frame(
                    &mut pixels,
                    &overscan,
                    data.zero_level,
                    &self.settings.auto_zero,
                )?);
            }
        }

        let mut hot_pixels_corrected = 0;
        if self.settings.hot_pixel_correction {
            if let Some(map) = &self.hot_pixels {
                hot_pixels_corrected =
                    map.apply(&exposure.subframe(), &mut pixels, P::from_raw(fill));
            }
        }

        Ok(Image {
            columns: exposure.columns,
            rows: exposure.rows,
            pixels,
            exposure,
            captured_at: Utc::now(),
            auto_zero,
            hot_pixels_corrected,
        })
    }

    /// Fetch auto-zero parameters and the overscan row that follows them.
    pub fn read_auto_zero(&mut self) -> CameraResult<(AutoZeroData, Vec<u16>)> {
        let body = self.transact(
            Command::GetAutoZero,
            PayloadWriter::new(),
            ExchangeOptions::streaming(),
        )?;
        let data = AutoZeroData::decode(&body)?;
        let count = data.pixel_count as usize;
        if count == 0 || count > MAX_OVERSCAN_PIXELS {
            self.framer.transport_mut().purge()?;
            return Err(CameraError::calibration(format!(
                "camera reported {} overscan pixels, expected 1..={}",
                count, MAX_OVERSCAN_PIXELS
            )));
        }
        let mut raw = vec![0u8; count * 2];
        self.framer.read_stream(&mut raw)?;
        Ok((data, decode_pixels(&raw)))
    }

    // ========================================================================
    // External trigger
    // ========================================================================

    pub fn set_external_trigger(
        &mut self,
        mode: TriggerMode,
        polarity: TriggerPolarity,
    ) -> CameraResult<()> {
        self.require(|d| d.features.external_trigger, "external trigger")?;
        let payload = PayloadWriter::new().u8(mode.code()).u8(match polarity {
            TriggerPolarity::Rising => 0,
            TriggerPolarity::Falling => 1,
        });
        self.with_payload(Command::SetExternalTrigger, payload)?;
        self.trigger = mode;
        Ok(())
    }

    pub fn clear_trigger_error(&mut self) -> CameraResult<()> {
        self.simple(Command::ClearTriggerError)?;
        Ok(())
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.trigger
    }

    // ========================================================================
    // Cooling
    // ========================================================================

    /// Turn the cooler on at `setpoint_celsius`, or off.
    pub fn set_temperature(&mut self, enabled: bool, setpoint_celsius: f64) -> CameraResult<()> {
        self.require(|d| d.has_temp_regulation, "temperature regulation")?;
        let payload = PayloadWriter::new()
            .bool(enabled)
            .i16(centi_celsius(setpoint_celsius));
        self.with_payload(Command::SetTemperature, payload)?;
        info!(enabled, setpoint_celsius, "cooler set");
        Ok(())
    }

    pub fn cooler_status(&mut self) -> CameraResult<CoolerStatus> {
        let policy = self.settings.connect_retry;
        let body = policy.run_any("get temperature", || self.simple(Command::GetTemperature))?;
        CoolerStatus::decode(&body)
    }

    // ========================================================================
    // Filter wheel
    // ========================================================================

    /// Move the filter wheel to `slot` (0-based), applying its configured trim.
    pub fn set_filter(&mut self, slot: u8) -> CameraResult<()> {
        let details = self.details_ref()?;
        if !details.has_filter_wheel {
            return Err(CameraError::invalid("camera has no filter wheel"));
        }
        if slot >= details.num_filters {
            return Err(CameraError::invalid(format!(
                "filter slot {} out of range 0..{}",
                slot, details.num_filters
            )));
        }
        let trim = self.settings.filter_trim(slot);
        self.with_payload(
            Command::SetFilterWheel,
            PayloadWriter::new().u8(slot).i16(trim),
        )?;
        info!(slot, trim, "filter wheel moving");
        Ok(())
    }

    /// Move to the slot whose configured name matches `name`.
    pub fn set_filter_by_name(&mut self, name: &str) -> CameraResult<u8> {
        let slot = self
            .settings
            .filter_index(name)
            .ok_or_else(|| CameraError::invalid(format!("no filter named '{}'", name)))?;
        self.set_filter(slot)?;
        Ok(slot)
    }

    pub fn filter_position(&mut self) -> CameraResult<u8> {
        self.require(|d| d.has_filter_wheel, "filter wheel")?;
        let body = self.simple(Command::GetFilterPosition)?;
        PayloadReader::new(Command::GetFilterPosition, &body).u8()
    }

    // ========================================================================
    // Guiding relays and shutter
    // ========================================================================

    pub fn activate_relay(&mut self, pulse: RelayPulse) -> CameraResult<()> {
        self.require(|d| d.has_relays, "guide relays")?;
        self.with_payload(Command::ActivateRelay, pulse.encode())
    }

    pub fn is_relay_done(&mut self) -> CameraResult<bool> {
        self.read_flag(Command::IsRelayDone)
    }

    pub fn set_shutter(&mut self, open: bool) -> CameraResult<()> {
        self.require(|d| d.has_shutter, "shutter")?;
        self.with_payload(Command::SetShutter, PayloadWriter::new().bool(open))
    }

    pub fn shutter_state(&mut self) -> CameraResult<ShutterState> {
        self.require(|d| d.features.shutter_state, "shutter state sensor")?;
        let body = self.simple(Command::GetShutterState)?;
        Ok(ShutterState::from_code(
            PayloadReader::new(Command::GetShutterState, &body).u8()?,
        ))
    }

    /// Give back the transport, closing nothing.
    pub fn into_transport(self) -> T {
        self.framer.into_transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{HotPixelMap, ZeroAdjustment};
    use crate::camera::config::MAX_OVERSCAN_PIXELS;
    use crate::camera::device::tcp_identity;
    use crate::camera::retry::RetryPolicy;
    use crate::camera::transport::{MockCameraTransport, QueueStatus};
    use crate::camera::types::GainMode;
    use crate::test_helpers::fixtures::{
        details_block, pixel_stream, sample_details, DetailsBuilder,
    };
    use crate::test_helpers::scripted::response;
    use crate::test_helpers::ScriptedTransport;
    use std::net::Ipv4Addr;

    const OK: u8 = 0;

    fn fast_settings() -> CameraSettings {
        CameraSettings {
            connect_retry: RetryPolicy {
                max_attempts: 3,
                delay_ms: 0,
            },
            ..CameraSettings::default()
        }
    }

    fn specs_body() -> Vec<u8> {
        PayloadWriter::new()
            .u24(10)
            .u24(360_000)
            .u16(1_500)
            .u16(4_200)
            .u24(100_000)
            .u16(65_535)
            .into_bytes()
    }

    /// Engine connected to a scripted camera with the given details.
    fn connected(details: &DeviceDetails) -> (CameraProtocol<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        transport.reply_packet(0x02, &[], OK);
        transport.reply_packet(0x01, &details_block(details), OK);
        let mut engine = CameraProtocol::new(transport.clone(), fast_settings());
        engine
            .connect(&tcp_identity(Ipv4Addr::LOCALHOST))
            .unwrap();
        (engine, transport)
    }

    #[test]
    fn test_connect_caches_details() {
        let (mut engine, transport) = connected(&sample_details());
        assert!(engine.is_connected());
        assert_eq!(transport.written_commands(), vec![0x02, 0x01]);

        let details = engine.device_details().unwrap();
        assert_eq!(details.columns, 3072);
        // served from cache
        assert_eq!(transport.written_commands().len(), 2);
    }

    #[test]
    fn test_init_retries_silent_device() {
        let transport = ScriptedTransport::new();
        transport.reply(&[]);
        transport.reply(&[]);
        transport.reply_packet(0x02, &[], OK);
        transport.reply_packet(0x01, &details_block(&sample_details()), OK);
        let mut engine = CameraProtocol::new(transport.clone(), fast_settings());

        engine.connect(&tcp_identity(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(transport.written_commands(), vec![0x02, 0x02, 0x02, 0x01]);
    }

    #[test]
    fn test_init_retries_busy_device() {
        let transport = ScriptedTransport::new();
        transport.reply_packet(0x02, &[], 0x05);
        transport.reply_packet(0x02, &[], OK);
        transport.reply_packet(0x01, &details_block(&sample_details()), OK);
        let mut engine = CameraProtocol::new(transport.clone(), fast_settings());

        engine.connect(&tcp_identity(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(transport.written_commands(), vec![0x02, 0x02, 0x01]);
    }

    #[test]
    fn test_state_poll_retries_busy_device() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[], 0x05);
        transport.reply_packet(0x0B, &[0x20], OK);
        assert_eq!(engine.camera_state().unwrap(), CameraState::Exposing);
    }

    #[test]
    fn test_connect_failure_closes_transport() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.reply_packet(0x02, &[], 0x05);
        }
        let mut engine = CameraProtocol::new(transport.clone(), fast_settings());

        let err = engine
            .connect(&tcp_identity(Ipv4Addr::LOCALHOST))
            .unwrap_err();

        assert_eq!(err.command(), Some(Command::Init));
        assert_eq!(err.device_status(), Some(0x05));
        assert_eq!(transport.written_commands(), vec![0x02, 0x02, 0x02]);
        assert!(!engine.is_connected());
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn test_connect_failure_closes_mock_transport() {
        // already opened by the selector
        let mut mock = MockCameraTransport::new();
        mock.expect_open().never();
        mock.expect_set_timeouts().returning(|_, _| Ok(()));
        mock.expect_is_open().return_const(true);
        mock.expect_queue_status()
            .returning(|| Ok(QueueStatus::default()));
        mock.expect_write().times(1).returning(|data| Ok(data.len()));
        mock.expect_read().returning(|_| Ok(0));
        mock.expect_close().times(1).return_const(());

        let settings = CameraSettings {
            connect_retry: RetryPolicy::none(),
            ..CameraSettings::default()
        };
        let mut engine = CameraProtocol::new(mock, settings);
        let err = engine
            .connect(&tcp_identity(Ipv4Addr::LOCALHOST))
            .unwrap_err();
        assert!(matches!(err, CameraError::ShortRead { .. }));
    }

    #[test]
    fn test_open_failure_is_terminal() {
        let transport = ScriptedTransport::new();
        transport.fail_open();
        let mut engine = CameraProtocol::new(transport.clone(), fast_settings());
        assert!(matches!(
            engine.connect(&tcp_identity(Ipv4Addr::LOCALHOST)),
            Err(CameraError::OpenFailed { .. })
        ));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_commands_require_connection() {
        let mut engine = CameraProtocol::new(ScriptedTransport::new(), fast_settings());
        assert!(matches!(engine.abort_exposure(), Err(CameraError::NotConnected)));
    }

    #[test]
    fn test_reconnect_invalidates_details() {
        let (mut engine, transport) = connected(&sample_details());
        let smaller = DetailsBuilder::new().size(1024, 1024).build();
        transport.reply_packet(0x02, &[], OK);
        transport.reply_packet(0x01, &details_block(&smaller), OK);

        let details = engine.reconnect().unwrap();
        assert_eq!(details.columns, 1024);
        assert_eq!(engine.device_details().unwrap().columns, 1024);
    }

    #[test]
    fn test_auto_gain_selects_and_caches() {
        let (mut engine, transport) = connected(&sample_details());
        assert_eq!(engine.settings().advanced.gain, GainMode::Auto);

        // 1x1: settings + specs, then start
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);
        let exposure = ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(1));
        engine.start_exposure(exposure).unwrap();
        assert_eq!(engine.applied_gain(), Some(CameraGain::High));
        let sent = transport.written();
        let advanced = &sent[2];
        assert_eq!(advanced[0], 0x11);
        assert_eq!(advanced[3], CameraGain::High.code());

        // same binning again: no settings resend
        transport.reply_packet(0x03, &[], OK);
        engine.start_exposure(exposure).unwrap();
        assert_eq!(
            transport.written_commands(),
            vec![0x02, 0x01, 0x11, 0x0F, 0x03, 0x03]
        );

        // 2x2 flips to low gain
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);
        let binned = ExposureSettings::full_frame(&sample_details(), 2, 2, Duration::from_secs(1));
        engine.start_exposure(binned).unwrap();
        assert_eq!(engine.applied_gain(), Some(CameraGain::Low));
        let sent = transport.written();
        assert_eq!(sent[6][3], CameraGain::Low.code());
        assert_eq!(transport.unused_replies(), 0);
    }

    #[test]
    fn test_invalid_binning_sends_nothing() {
        let details = DetailsBuilder::new().symmetric_binning_only().build();
        let (mut engine, transport) = connected(&details);

        let exposure = ExposureSettings::full_frame(&details, 2, 1, Duration::from_secs(1));
        let err = engine.start_exposure(exposure).unwrap_err();
        assert!(matches!(err, CameraError::InvalidSettings { .. }));
        assert_eq!(transport.written_commands().len(), 2);
    }

    #[test]
    fn test_1x2_quirk_allowed_by_default() {
        let details = DetailsBuilder::new().symmetric_binning_only().build();
        let (mut engine, transport) = connected(&details);
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);

        let exposure = ExposureSettings::full_frame(&details, 1, 2, Duration::from_secs(1));
        engine.start_exposure(exposure).unwrap();
    }

    #[test]
    fn test_exposure_uses_long_timeout() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);

        let exposure =
            ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(30));
        engine.start_exposure(exposure).unwrap();
        assert!(transport
            .timeout_history()
            .contains(&Duration::from_secs(40)));
        assert_eq!(
            transport.timeout_history().last().copied(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_fine_timing_probe_cached() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        // probe unsupported
        transport.reply_packet(0x17, &[], 0x08);
        transport.reply_packet(0x03, &[], OK);
        transport.reply_packet(0x03, &[], OK);

        let mut exposure =
            ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(1));
        exposure.set_exposure_time(Duration::from_micros(1_000_500));
        engine.start_exposure(exposure).unwrap();
        engine.start_exposure(exposure).unwrap();

        assert_eq!(
            transport.written_commands(),
            vec![0x02, 0x01, 0x11, 0x0F, 0x17, 0x03, 0x03]
        );
    }

    #[test]
    fn test_fine_timing_uses_extended_start() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x17, &[], OK);
        transport.reply_packet(0x16, &[], OK);

        let mut exposure =
            ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(1));
        exposure.set_exposure_time(Duration::from_micros(1_000_500));
        engine.start_exposure(exposure).unwrap();

        let sent = transport.written();
        let start = sent.last().unwrap();
        assert_eq!(start[0], 0x16);
        assert_eq!(start[1], 19);
        assert_eq!(start[20], 5);
    }

    #[test]
    fn test_state_polling_priority() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[0x21], OK);
        assert_eq!(engine.camera_state().unwrap(), CameraState::Exposing);
        assert_eq!(engine.last_state(), Some(CameraState::Exposing));
    }

    #[test]
    fn test_trigger_timeout_recovery() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);
        let mut exposure =
            ExposureSettings::full_frame(&sample_details(), 1, 1, Duration::from_secs(1));
        exposure.trigger = TriggerMode::ShortWait;
        engine.start_exposure(exposure).unwrap();

        transport.reply_packet(0x0B, &[0x40], OK);
        transport.reply_packet(0x15, &[], OK);
        transport.reply_packet(0x0B, &[0x04], OK);

        assert_eq!(engine.camera_state().unwrap(), CameraState::WaitingTrigger);
        let commands = transport.written_commands();
        assert_eq!(&commands[commands.len() - 3..], &[0x0B, 0x15, 0x0B]);
    }

    #[test]
    fn test_error_state_without_trigger_is_reported() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[0x40], OK);
        assert_eq!(engine.camera_state().unwrap(), CameraState::Error);
        assert_eq!(transport.written_commands().last(), Some(&0x0B));
    }

    #[test]
    fn test_wait_for_idle() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[0x20], OK);
        transport.reply_packet(0x0B, &[0x10], OK);
        transport.reply_packet(0x0B, &[0x00], OK);
        let state = engine
            .wait_for_idle(Duration::ZERO, Duration::from_secs(5))
            .unwrap();
        assert_eq!(state, CameraState::Idle);
    }

    #[test]
    fn test_wait_for_idle_waits_for_filter_wheel() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[0x01], OK);
        transport.reply_packet(0x0B, &[0x00], OK);
        let state = engine
            .wait_for_idle(Duration::ZERO, Duration::from_secs(5))
            .unwrap();
        assert_eq!(state, CameraState::Idle);
        assert_eq!(transport.unused_replies(), 0);
    }

    #[test]
    fn test_wait_for_idle_times_out() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0B, &[0x20], OK);
        let err = engine
            .wait_for_idle(Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            CameraError::StateTimeout {
                state: CameraState::Exposing,
                ..
            }
        ));
    }

    /// Script a full 1x1 exposure on a camera of the given size and return the
    /// engine ready for transfer.
    fn exposed(
        details: &DeviceDetails,
    ) -> (CameraProtocol<ScriptedTransport>, ScriptedTransport, ExposureSettings) {
        let (mut engine, transport) = connected(details);
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);
        transport.reply_packet(0x03, &[], OK);
        let exposure = ExposureSettings::full_frame(details, 1, 1, Duration::from_secs(1));
        engine.start_exposure(exposure).unwrap();
        (engine, transport, exposure)
    }

    fn auto_zero_body(enabled: bool, level: u16, count: u16) -> Vec<u8> {
        PayloadWriter::new()
            .bool(enabled)
            .u16(level)
            .u16(count)
            .into_bytes()
    }

    #[test]
    fn test_exposure_happy_path_full_frame() {
        let details = sample_details();
        let (mut engine, transport, _) = exposed(&details);
        let count = 3072 * 2048;

        transport.reply_packet(0x0B, &[0x20], OK);
        transport.reply_packet(0x0B, &[0x10], OK);
        transport.reply_packet(0x0B, &[0x00], OK);
        transport.reply_with_stream(0x05, &[], &pixel_stream(1000, count));
        transport.reply_with_stream(0x12, &auto_zero_body(true, 1000, 64), &pixel_stream(998, 64));

        engine
            .wait_for_idle(Duration::ZERO, Duration::from_secs(5))
            .unwrap();
        let image = engine.transfer_image::<u16>().unwrap();

        assert_eq!((image.columns, image.rows), (3072, 2048));
        assert_eq!(image.pixels.len(), count);
        assert!(image.pixels.iter().all(|&p| p == 1002));
        let report = image.auto_zero.unwrap();
        assert_eq!(report.adjustment, ZeroAdjustment::Offset(2.0));
        assert_eq!(transport.pending().rx_pending, 0);
    }

    #[test]
    fn test_transfer_without_auto_zero_feature() {
        let details = DetailsBuilder::new().size(4, 2).no_auto_zero().build();
        let (mut engine, transport, _) = exposed(&details);
        transport.reply_with_stream(0x05, &[], &pixel_stream(321, 8));

        let image = engine.transfer_image::<f64>().unwrap();
        assert!(image.auto_zero.is_none());
        assert!(image.pixels.iter().all(|&p| p == 321.0));
        assert_eq!(transport.written_commands().last(), Some(&0x05));
    }

    #[test]
    fn test_transfer_applies_hot_pixels_with_zero_level() {
        let details = DetailsBuilder::new().size(4, 4).build();
        let (mut engine, transport, _) = exposed(&details);
        let mut map = HotPixelMap::new("KAF-6303", "CCD0042");
        map.add_pixel(1, 1);
        engine.set_hot_pixel_map(Some(map));

        transport.reply_with_stream(0x05, &[], &pixel_stream(5000, 16));
        transport.reply_with_stream(0x12, &auto_zero_body(true, 1000, 8), &pixel_stream(1000, 8));

        let image = engine.transfer_image::<i32>().unwrap();
        assert_eq!(image.hot_pixels_corrected, 1);
        assert_eq!(image.pixel(1, 1), Some(1000));
        assert_eq!(image.pixel(0, 0), Some(5000));
    }

    #[test]
    fn test_hot_pixel_fill_ignores_disabled_auto_zero() {
        let details = DetailsBuilder::new().size(4, 4).build();
        let (mut engine, transport, _) = exposed(&details);
        let mut map = HotPixelMap::new("KAF-6303", "CCD0042");
        map.add_pixel(2, 3);
        engine.set_hot_pixel_map(Some(map));

        transport.reply_with_stream(0x05, &[], &pixel_stream(5000, 16));
        transport.reply_with_stream(0x12, &auto_zero_body(false, 1000, 8), &pixel_stream(990, 8));

        let image = engine.transfer_image::<u16>().unwrap();
        assert!(image.auto_zero.is_none());
        assert_eq!(image.pixel(2, 3), Some(0));
        assert_eq!(image.pixel(0, 0), Some(5000));
    }

    #[test]
    fn test_transfer_rejects_bad_overscan_count() {
        let details = DetailsBuilder::new().size(4, 2).build();
        let (mut engine, transport, _) = exposed(&details);
        transport.reply_with_stream(0x05, &[], &pixel_stream(100, 8));
        transport.reply_packet(
            0x12,
            &auto_zero_body(true, 1000, (MAX_OVERSCAN_PIXELS + 1) as u16),
            OK,
        );

        let err = engine.transfer_image::<u16>().unwrap_err();
        assert!(matches!(err, CameraError::Calibration { .. }));
    }

    #[test]
    fn test_transfer_requires_exposure() {
        let (mut engine, _transport) = connected(&sample_details());
        assert!(matches!(
            engine.transfer_image::<u16>(),
            Err(CameraError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn test_device_error_carries_command() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x0A, &[], 0x04);
        let err = engine.set_filter(2).unwrap_err();
        assert_eq!(err.command(), Some(Command::SetFilterWheel));
        assert_eq!(err.device_status(), Some(0x04));
        assert_eq!(
            err.legacy_code(),
            Command::SetFilterWheel.error_base() + 0x04
        );
    }

    #[test]
    fn test_filter_bounds_and_trim() {
        let (mut engine, transport) = connected(&sample_details());
        let mut settings = fast_settings();
        settings.filters = vec![
            crate::camera::types::FilterSlot {
                name: "L".to_string(),
                trim: 0,
            },
            crate::camera::types::FilterSlot {
                name: "Ha".to_string(),
                trim: -3,
            },
        ];
        engine.set_settings(settings).unwrap();

        assert!(engine.set_filter(5).is_err());

        transport.reply_packet(0x0A, &[], OK);
        assert_eq!(engine.set_filter_by_name("ha").unwrap(), 1);
        assert_eq!(transport.written().last().unwrap(), &vec![0x0A, 3, 1, 0xFF, 0xFD]);
    }

    #[test]
    fn test_cooler_commands() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x06, &[], OK);
        engine.set_temperature(true, -15.0).unwrap();
        assert_eq!(
            transport.written().last().unwrap(),
            &vec![0x06, 3, 1, 0xFA, 0x24]
        );

        let body = PayloadWriter::new().u8(1).i16(-1400).i16(2000).u16(8000).into_bytes();
        transport.reply(&response(0x07, &body, OK));
        let status = engine.cooler_status().unwrap();
        assert_eq!(status.ccd_celsius, -14.0);
        assert_eq!(status.power_percent, 80.0);
    }

    #[test]
    fn test_can_abort_without_feature() {
        let mut features = sample_details().features;
        features.can_abort = false;
        let details = DetailsBuilder::new().features(features).build();
        let (mut engine, transport) = connected(&details);
        assert!(!engine.can_abort_exposure().unwrap());
        assert_eq!(transport.written_commands().len(), 2);
    }

    #[test]
    fn test_relay_and_shutter() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x08, &[], OK);
        transport.reply_packet(0x09, &[1], OK);
        transport.reply_packet(0x0C, &[], OK);
        transport.reply_packet(0x13, &[1], OK);

        engine
            .activate_relay(RelayPulse {
                y_minus: Duration::from_millis(500),
                ..RelayPulse::default()
            })
            .unwrap();
        assert!(engine.is_relay_done().unwrap());
        engine.set_shutter(true).unwrap();
        assert_eq!(engine.shutter_state().unwrap(), ShutterState::Open);
    }

    #[test]
    fn test_external_trigger_arms_mode() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x14, &[], OK);
        engine
            .set_external_trigger(TriggerMode::LongWait, TriggerPolarity::Falling)
            .unwrap();
        assert_eq!(engine.trigger_mode(), TriggerMode::LongWait);
        assert_eq!(transport.written().last().unwrap(), &vec![0x14, 2, 2, 1]);
    }

    #[test]
    fn test_configure_advanced_refreshes_specs() {
        let (mut engine, transport) = connected(&sample_details());
        transport.reply_packet(0x11, &[], OK);
        transport.reply_packet(0x0F, &specs_body(), OK);

        let advanced = AdvancedSettings {
            gain: GainMode::Low,
            ..AdvancedSettings::default()
        };
        engine.configure_advanced(advanced).unwrap();
        assert_eq!(engine.applied_gain(), Some(CameraGain::Low));
        assert_eq!(
            engine.ccd_specs().unwrap().max_exposure,
            Duration::from_secs(3600)
        );
        assert_eq!(transport.written_commands(), vec![0x02, 0x01, 0x11, 0x0F]);
    }
}
