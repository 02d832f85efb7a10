//! Per-connection camera handle.
//!
//! [`Camera`] owns the protocol engine behind one mutex. Every call holds the
//! lock for its whole operation, so exchanges on a connection never
//! interleave and callers on other threads queue in order.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use super::config::STATE_POLL_INTERVAL;
use super::connection::{open_first, AnyTransport};
use super::device::DeviceIdentity;
use super::error::CameraResult;
use super::protocol::CameraProtocol;
use super::state::CameraState;
use super::transport::CameraTransport;
use super::types::{
    AdvancedSettings, CameraGain, CcdSpecs, CoolerStatus, DeviceDetails, ExposureSettings,
    RelayPulse, ShutterState, TriggerMode, TriggerPolarity,
};
use crate::calibration::{AdcPixel, HotPixelMap};
use crate::image::Image;
use crate::settings::CameraSettings;

/// Thread-safe handle to one connected camera.
pub struct Camera<T: CameraTransport> {
    engine: Mutex<CameraProtocol<T>>,
}

impl Camera<AnyTransport> {
    /// Connect to the camera at `identity` over the matching transport.
    pub fn open(identity: &DeviceIdentity, settings: CameraSettings) -> CameraResult<Self> {
        let camera = Self::new(AnyTransport::for_identity(identity), settings);
        camera.connect(identity)?;
        Ok(camera)
    }

    /// Connect to the first candidate whose transport opens.
    pub fn open_any(
        candidates: &[DeviceIdentity],
        settings: CameraSettings,
    ) -> CameraResult<Self> {
        let (identity, transport) = open_first(candidates)?;
        let camera = Self::new(transport, settings);
        camera.connect(&identity)?;
        Ok(camera)
    }
}

impl<T: CameraTransport> Camera<T> {
    /// Wrap an unconnected transport.
    pub fn new(transport: T, settings: CameraSettings) -> Self {
        Self {
            engine: Mutex::new(CameraProtocol::new(transport, settings)),
        }
    }

    pub fn connect(&self, identity: &DeviceIdentity) -> CameraResult<DeviceDetails> {
        self.engine.lock().connect(identity)
    }

    pub fn disconnect(&self) {
        self.engine.lock().disconnect()
    }

    pub fn reconnect(&self) -> CameraResult<DeviceDetails> {
        self.engine.lock().reconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.engine.lock().is_connected()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.engine.lock().identity().cloned()
    }

    pub fn settings(&self) -> CameraSettings {
        self.engine.lock().settings().clone()
    }

    pub fn set_settings(&self, settings: CameraSettings) -> CameraResult<()> {
        self.engine.lock().set_settings(settings)
    }

    pub fn set_hot_pixel_map(&self, map: Option<HotPixelMap>) {
        self.engine.lock().set_hot_pixel_map(map)
    }

    pub fn device_details(&self) -> CameraResult<DeviceDetails> {
        self.engine.lock().device_details()
    }

    pub fn ccd_specs(&self) -> CameraResult<CcdSpecs> {
        self.engine.lock().ccd_specs()
    }

    pub fn advanced_defaults(&self) -> CameraResult<AdvancedSettings> {
        self.engine.lock().advanced_defaults()
    }

    pub fn configure_advanced(&self, advanced: AdvancedSettings) -> CameraResult<()> {
        self.engine.lock().configure_advanced(advanced)
    }

    pub fn applied_gain(&self) -> Option<CameraGain> {
        self.engine.lock().applied_gain()
    }

    pub fn start_exposure(&self, exposure: ExposureSettings) -> CameraResult<()> {
        self.engine.lock().start_exposure(exposure)
    }

    pub fn abort_exposure(&self) -> CameraResult<()> {
        self.engine.lock().abort_exposure()
    }

    pub fn can_abort_exposure(&self) -> CameraResult<bool> {
        self.engine.lock().can_abort_exposure()
    }

    pub fn camera_state(&self) -> CameraResult<CameraState> {
        self.engine.lock().camera_state()
    }

    /// Poll at the default interval until the camera is no longer busy.
    pub fn wait_for_idle(&self, timeout: Duration) -> CameraResult<CameraState> {
        self.engine
            .lock()
            .wait_for_idle(STATE_POLL_INTERVAL, timeout)
    }

    pub fn transfer_image<P: AdcPixel>(&self) -> CameraResult<Image<P>> {
        self.engine.lock().transfer_image()
    }

    /// Expose, wait for readout and download one calibrated frame.
    ///
    /// The lock is held for the whole cycle. `readout_timeout` is added to the
    /// exposure time for the wait.
    pub fn capture<P: AdcPixel>(
        &self,
        exposure: ExposureSettings,
        readout_timeout: Duration,
    ) -> CameraResult<Image<P>> {
        let mut engine = self.engine.lock();
        engine.start_exposure(exposure)?;
        let state = engine.wait_for_idle(
            STATE_POLL_INTERVAL,
            exposure.exposure_time() + readout_timeout,
        )?;
        info!(%state, "exposure complete, downloading");
        engine.transfer_image()
    }

    pub fn set_external_trigger(
        &self,
        mode: TriggerMode,
        polarity: TriggerPolarity,
    ) -> CameraResult<()> {
        self.engine.lock().set_external_trigger(mode, polarity)
    }

    pub fn clear_trigger_error(&self) -> CameraResult<()> {
        self.engine.lock().clear_trigger_error()
    }

    pub fn set_temperature(&self, enabled: bool, setpoint_celsius: f64) -> CameraResult<()> {
        self.engine.lock().set_temperature(enabled, setpoint_celsius)
    }

    pub fn cooler_status(&self) -> CameraResult<CoolerStatus> {
        self.engine.lock().cooler_status()
    }

    pub fn set_filter(&self, slot: u8) -> CameraResult<()> {
        self.engine.lock().set_filter(slot)
    }

    pub fn set_filter_by_name(&self, name: &str) -> CameraResult<u8> {
        self.engine.lock().set_filter_by_name(name)
    }

    pub fn filter_position(&self) -> CameraResult<u8> {
        self.engine.lock().filter_position()
    }

    pub fn activate_relay(&self, pulse: RelayPulse) -> CameraResult<()> {
        self.engine.lock().activate_relay(pulse)
    }

    pub fn is_relay_done(&self) -> CameraResult<bool> {
        self.engine.lock().is_relay_done()
    }

    pub fn set_shutter(&self, open: bool) -> CameraResult<()> {
        self.engine.lock().set_shutter(open)
    }

    pub fn shutter_state(&self) -> CameraResult<ShutterState> {
        self.engine.lock().shutter_state()
    }

    pub fn supports_fine_timing(&self) -> bool {
        self.engine.lock().supports_fine_timing()
    }
}
