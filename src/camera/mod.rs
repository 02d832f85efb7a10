//! Packet protocol driver for scientific CCD cameras.
//!
//! Cameras attach over a USB serial bridge or over TCP and speak the same
//! request/response packet protocol on both.
//!
//! # Protocol Overview
//!
//! Every exchange is one request packet and one response packet:
//! 1. **Request** - `[command, length, payload...]`, payload at most 124 bytes
//! 2. **Response** - the command echoed back, then a payload whose last byte
//!    is the device status (0 is success)
//! 3. **Streams** - image and overscan pixels follow their response as raw
//!    little-endian 16-bit samples
//!
//! # Example
//!
//! ```ignore
//! use ccdlink::camera::{find_usb_cameras, Camera};
//!
//! let candidates = find_usb_cameras();
//! let camera = Camera::open_any(&candidates, CameraSettings::default())?;
//! let exposure = ExposureSettings::full_frame(&camera.device_details()?, 1, 1, Duration::from_secs(5));
//! let image = camera.capture::<u16>(exposure, Duration::from_secs(30))?;
//! ```

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod framer;
pub mod packet;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod state;
pub mod tcp;
pub mod transport;
pub mod types;

// Device discovery
pub use device::{
    find_usb_cameras, resolve_usb, tcp_identity, usb_identity_by_serial, ConnectionKind,
    DeviceIdentity,
};

// Connection and engine
pub use connection::{open_first, open_transport, AnyTransport};
pub use protocol::CameraProtocol;
pub use session::Camera;
pub use transport::CameraTransport;

// Errors and policies
pub use error::{CameraError, CameraResult, ErrorLayer};
pub use framer::TimeoutConfig;
pub use retry::RetryPolicy;

// Wire types
pub use state::CameraState;
pub use types::{
    AdvancedSettings, CameraGain, CcdSpecs, CoolerState, CoolerStatus, DeviceDetails,
    ExposureSettings, FanMode, FilterSlot, GainMode, RelayPulse, ShutterState, Subframe,
    TriggerMode, TriggerPolarity,
};
