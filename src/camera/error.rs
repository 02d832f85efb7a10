//! Camera error types.
//!
//! Errors are tagged by the layer that produced them. Device errors carry the
//! command that failed and the raw status byte the firmware returned, so the
//! caller can tell "which operation" apart from "what the device said".

use thiserror::Error;

use super::config::{describe_status, Command};
use super::state::CameraState;

/// Result type alias for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Layer an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    /// Byte-stream open/close/read/write failures.
    Transport,
    /// Packet framing and queue discipline violations.
    Framing,
    /// The camera firmware rejected or failed the operation.
    Device,
    /// Auto-zero or hot-pixel processing failures.
    Calibration,
    /// Caller-supplied settings that cannot be sent.
    Configuration,
}

impl ErrorLayer {
    /// Base of the legacy numeric error space for this layer.
    fn legacy_base(self) -> u32 {
        match self {
            ErrorLayer::Transport => 0x0100,
            ErrorLayer::Framing => 0x0200,
            ErrorLayer::Device => 0,
            ErrorLayer::Calibration => 0x0300,
            ErrorLayer::Configuration => 0x0400,
        }
    }
}

/// Which side of an exchange found a dirty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePhase {
    Before,
    After,
}

impl std::fmt::Display for QueuePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueuePhase::Before => f.write_str("before"),
            QueuePhase::After => f.write_str("after"),
        }
    }
}

/// Errors that can occur while talking to a camera.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Serial port error from the serialport crate.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading or saving settings.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No camera matching the identity is attached.
    #[error("No compatible camera found")]
    NoDeviceFound,

    /// Serial port is busy (in use by another process).
    #[error("Port '{port}' is busy or in use by another application")]
    PortBusy { port: String },

    /// Permission denied accessing serial port.
    #[error("Permission denied for port '{port}'")]
    PortPermissionDenied { port: String },

    /// The transport could not be opened for this identity.
    #[error("Failed to open {identity}: {reason}")]
    OpenFailed { identity: String, reason: String },

    /// An operation was attempted on a closed transport.
    #[error("Camera is not connected")]
    NotConnected,

    /// Fewer bytes were written than the frame required.
    #[error("Short write: wrote {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    /// A read timed out before the expected byte count arrived.
    #[error("Short read: received {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    /// The response echoed a different command byte than the request.
    #[error("Command mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    CommandMismatch { expected: u8, actual: u8 },

    /// Declared or requested payload exceeds the packet limit.
    #[error("Payload size {size} exceeds maximum {max_size}")]
    PayloadTooLarge { size: usize, max_size: usize },

    /// Unexpected bytes were pending around an exchange.
    #[error("Queue was dirty {phase} exchange: {rx_pending} bytes pending in, {tx_pending} out")]
    DirtyQueue {
        phase: QueuePhase,
        rx_pending: usize,
        tx_pending: usize,
    },

    /// A response payload did not match the command's layout.
    #[error("Malformed {command} response: {reason}")]
    MalformedResponse { command: Command, reason: String },

    /// The firmware reported a non-zero status.
    #[error("{command} failed: {} (status 0x{status:02X})", status_text(.status))]
    Device { command: Command, status: u8 },

    /// The camera stayed busy past the caller's deadline.
    #[error("Camera still {state} after {timeout_ms} ms")]
    StateTimeout { state: CameraState, timeout_ms: u64 },

    /// Auto-zero or hot-pixel processing failed.
    #[error("Calibration error: {reason}")]
    Calibration { reason: String },

    /// Settings were rejected before anything was sent.
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },
}

fn status_text(status: &u8) -> &'static str {
    describe_status(*status)
}

impl CameraError {
    /// Layer this error originated from.
    pub fn layer(&self) -> ErrorLayer {
        match self {
            CameraError::Serial(_)
            | CameraError::Io(_)
            | CameraError::NoDeviceFound
            | CameraError::PortBusy { .. }
            | CameraError::PortPermissionDenied { .. }
            | CameraError::OpenFailed { .. }
            | CameraError::NotConnected => ErrorLayer::Transport,
            CameraError::ShortWrite { .. }
            | CameraError::ShortRead { .. }
            | CameraError::CommandMismatch { .. }
            | CameraError::PayloadTooLarge { .. }
            | CameraError::DirtyQueue { .. }
            | CameraError::MalformedResponse { .. } => ErrorLayer::Framing,
            CameraError::Device { .. } | CameraError::StateTimeout { .. } => ErrorLayer::Device,
            CameraError::Calibration { .. } => ErrorLayer::Calibration,
            CameraError::Json(_) | CameraError::InvalidSettings { .. } => {
                ErrorLayer::Configuration
            }
        }
    }

    /// Command that failed, for device errors.
    pub fn command(&self) -> Option<Command> {
        match self {
            CameraError::Device { command, .. } => Some(*command),
            CameraError::MalformedResponse { command, .. } => Some(*command),
            _ => None,
        }
    }

    /// Raw status byte reported by the firmware, for device errors.
    pub fn device_status(&self) -> Option<u8> {
        match self {
            CameraError::Device { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error is retriable (transient errors that may succeed on retry).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CameraError::Io(_)
                | CameraError::ShortRead { .. }
                | CameraError::ShortWrite { .. }
                | CameraError::DirtyQueue { .. }
        )
    }

    /// Composed numeric code for callers that expect a single integer.
    ///
    /// Device errors are `command.error_base() + status`; every other error is
    /// its layer base plus a per-variant offset.
    pub fn legacy_code(&self) -> u32 {
        match self {
            CameraError::Device { command, status } => command.error_base() + *status as u32,
            CameraError::StateTimeout { .. } => Command::GetDeviceState.error_base() + 0xFF,
            other => other.layer().legacy_base() + other.variant_offset(),
        }
    }

    fn variant_offset(&self) -> u32 {
        match self {
            CameraError::Serial(_) => 1,
            CameraError::Io(_) => 2,
            CameraError::NoDeviceFound => 3,
            CameraError::PortBusy { .. } => 4,
            CameraError::PortPermissionDenied { .. } => 5,
            CameraError::OpenFailed { .. } => 6,
            CameraError::NotConnected => 7,
            CameraError::ShortWrite { .. } => 1,
            CameraError::ShortRead { .. } => 2,
            CameraError::CommandMismatch { .. } => 3,
            CameraError::PayloadTooLarge { .. } => 4,
            CameraError::DirtyQueue { .. } => 5,
            CameraError::MalformedResponse { .. } => 6,
            CameraError::Calibration { .. } => 1,
            CameraError::Json(_) => 1,
            CameraError::InvalidSettings { .. } => 2,
            CameraError::Device { .. } | CameraError::StateTimeout { .. } => 0,
        }
    }

    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            CameraError::Serial(_) => "CAM-001",
            CameraError::Io(_) => "CAM-002",
            CameraError::NoDeviceFound => "CAM-010",
            CameraError::PortBusy { .. } => "CAM-011",
            CameraError::PortPermissionDenied { .. } => "CAM-012",
            CameraError::OpenFailed { .. } => "CAM-013",
            CameraError::NotConnected => "CAM-014",
            CameraError::ShortWrite { .. } => "CAM-020",
            CameraError::ShortRead { .. } => "CAM-021",
            CameraError::CommandMismatch { .. } => "CAM-022",
            CameraError::PayloadTooLarge { .. } => "CAM-023",
            CameraError::DirtyQueue { .. } => "CAM-024",
            CameraError::MalformedResponse { .. } => "CAM-025",
            CameraError::Device { .. } => "CAM-030",
            CameraError::StateTimeout { .. } => "CAM-031",
            CameraError::Calibration { .. } => "CAM-040",
            CameraError::Json(_) => "CAM-050",
            CameraError::InvalidSettings { .. } => "CAM-051",
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CameraError::InvalidSettings {
            reason: reason.into(),
        }
    }

    pub(crate) fn calibration(reason: impl Into<String>) -> Self {
        CameraError::Calibration {
            reason: reason.into(),
        }
    }
}
