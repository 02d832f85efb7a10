//! Configuration constants for the camera command protocol.

use std::time::Duration;

// ============================================================================
// USB Device Identifiers
// ============================================================================

/// USB bridge chip vendor ID used by the camera family.
pub const CAMERA_VID: u16 = 0x0403;

/// Product IDs for cameras built on the full-speed serial bridge.
pub const FULL_SPEED_PIDS: &[u16] = &[
    0xEB48, // 500/600 series
    0xEB4A, // 600 series, revision B
];

/// Product IDs for cameras built on the high-speed synchronous FIFO bridge.
pub const HIGH_SPEED_PIDS: &[u16] = &[
    0xEB49, // RS series
];

// ============================================================================
// Serial Communication
// ============================================================================

/// Nominal baud rate. The bridge ignores it, but the driver requires a value.
pub const USB_BAUD_RATE: u32 = 3_000_000;

/// Delay after opening a high-speed bridge before the FIFO accepts data.
pub const FIFO_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Bytes per USB bulk packet on a full-speed bridge.
pub const FULL_SPEED_PACKET_SIZE: usize = 64;

/// Bytes per USB bulk packet on a high-speed bridge.
pub const HIGH_SPEED_PACKET_SIZE: usize = 512;

/// Modem status bytes the bridge prepends to every USB packet.
pub const USB_PACKET_STATUS_BYTES: usize = 2;

/// USB packets requested per bulk transfer.
pub const USB_PACKETS_PER_TRANSFER: usize = 64;

// ============================================================================
// Network Communication
// ============================================================================

/// Well-known TCP port of the camera's network interface.
pub const CAMERA_TCP_PORT: u16 = 5555;

/// Timeout for establishing the TCP connection.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Read granularity for socket transfers.
pub const TCP_BLOCK_SIZE: usize = 64 * 1024;

// ============================================================================
// Protocol Timeouts
// ============================================================================

/// Default read/write timeout for a normal exchange.
pub const NORMAL_TIMEOUT_MS: u64 = 5000;

/// Timeout for capability probes, which must fail fast.
pub const SHORT_TIMEOUT_MS: u64 = 1000;

/// Margin added to the exposure duration for exposure-start acknowledgements.
pub const LONG_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Default interval between state polls while waiting for a frame.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Retry Configuration
// ============================================================================

/// Total attempts for connection-establishment commands.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Fixed delay between connection-establishment attempts.
pub const CONNECT_RETRY_DELAY_MS: u64 = 100;

// ============================================================================
// Packet Configuration
// ============================================================================

/// Packet header size: command byte + length byte.
pub const PACKET_HEADER_SIZE: usize = 2;

/// Maximum payload carried by one packet.
pub const MAX_PAYLOAD_SIZE: usize = 124;

/// Maximum size of a framed packet.
pub const MAX_PACKET_SIZE: usize = PACKET_HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// Maximum overscan pixels the camera reports for auto-zero.
pub const MAX_OVERSCAN_PIXELS: usize = 4096;

/// Length of the fixed-width model and serial fields in the details block.
pub const DETAILS_STRING_LEN: usize = 32;

// ============================================================================
// Command Opcodes
// ============================================================================

/// Camera command opcodes.
///
/// The opcode is the first byte of every request and is echoed back as the
/// first byte of the matching response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    GetDeviceDetails = 0x01,
    Init = 0x02,
    StartExposure = 0x03,
    AbortExposure = 0x04,
    TransferImage = 0x05,
    SetTemperature = 0x06,
    GetTemperature = 0x07,
    ActivateRelay = 0x08,
    IsRelayDone = 0x09,
    SetFilterWheel = 0x0A,
    GetDeviceState = 0x0B,
    SetShutter = 0x0C,
    GetFilterPosition = 0x0D,
    CanAbortExposure = 0x0E,
    GetCcdSpecs = 0x0F,
    GetAdvancedDefaults = 0x10,
    SendAdvancedSettings = 0x11,
    GetAutoZero = 0x12,
    GetShutterState = 0x13,
    SetExternalTrigger = 0x14,
    ClearTriggerError = 0x15,
    StartExposureEx = 0x16,
    ProbeExposureTiming = 0x17,
}

impl Command {
    /// Every opcode, in wire order.
    pub const ALL: [Command; 23] = [
        Command::GetDeviceDetails,
        Command::Init,
        Command::StartExposure,
        Command::AbortExposure,
        Command::TransferImage,
        Command::SetTemperature,
        Command::GetTemperature,
        Command::ActivateRelay,
        Command::IsRelayDone,
        Command::SetFilterWheel,
        Command::GetDeviceState,
        Command::SetShutter,
        Command::GetFilterPosition,
        Command::CanAbortExposure,
        Command::GetCcdSpecs,
        Command::GetAdvancedDefaults,
        Command::SendAdvancedSettings,
        Command::GetAutoZero,
        Command::GetShutterState,
        Command::SetExternalTrigger,
        Command::ClearTriggerError,
        Command::StartExposureEx,
        Command::ProbeExposureTiming,
    ];

    /// Parse an opcode from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| *c as u8 == byte)
    }

    /// Wire byte of this opcode.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Protocol-layer error base for this command.
    ///
    /// Device status bytes are added on top of this base in legacy numeric
    /// error codes, so the base keeps a 0x100 stride per command.
    pub fn error_base(self) -> u32 {
        0x1000 + (self as u32) * 0x100
    }

    /// Short name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Command::GetDeviceDetails => "get device details",
            Command::Init => "init",
            Command::StartExposure => "start exposure",
            Command::AbortExposure => "abort exposure",
            Command::TransferImage => "transfer image",
            Command::SetTemperature => "set temperature",
            Command::GetTemperature => "get temperature",
            Command::ActivateRelay => "activate relay",
            Command::IsRelayDone => "is relay done",
            Command::SetFilterWheel => "set filter wheel",
            Command::GetDeviceState => "get device state",
            Command::SetShutter => "set shutter",
            Command::GetFilterPosition => "get filter position",
            Command::CanAbortExposure => "can abort exposure",
            Command::GetCcdSpecs => "get CCD specs",
            Command::GetAdvancedDefaults => "get advanced defaults",
            Command::SendAdvancedSettings => "send advanced settings",
            Command::GetAutoZero => "get auto-zero",
            Command::GetShutterState => "get shutter state",
            Command::SetExternalTrigger => "set external trigger",
            Command::ClearTriggerError => "clear trigger error",
            Command::StartExposureEx => "start exposure (extended)",
            Command::ProbeExposureTiming => "probe exposure timing",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Device Status Codes
// ============================================================================

/// Status byte reported by the camera firmware at the end of each response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceStatus {
    Success = 0x00,
    InvalidParameter = 0x01,
    BadBinSize = 0x02,
    TemperatureOutOfRange = 0x03,
    InvalidFilterPosition = 0x04,
    NotConnected = 0x05,
    ExposureInProgress = 0x06,
    TriggerTimeout = 0x07,
    NotSupported = 0x08,
}

impl DeviceStatus {
    /// Parse a status code from a byte value.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(DeviceStatus::Success),
            0x01 => Some(DeviceStatus::InvalidParameter),
            0x02 => Some(DeviceStatus::BadBinSize),
            0x03 => Some(DeviceStatus::TemperatureOutOfRange),
            0x04 => Some(DeviceStatus::InvalidFilterPosition),
            0x05 => Some(DeviceStatus::NotConnected),
            0x06 => Some(DeviceStatus::ExposureInProgress),
            0x07 => Some(DeviceStatus::TriggerTimeout),
            0x08 => Some(DeviceStatus::NotSupported),
            _ => None,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DeviceStatus::Success => "Operation successful",
            DeviceStatus::InvalidParameter => "Invalid parameter",
            DeviceStatus::BadBinSize => "Bad bin size",
            DeviceStatus::TemperatureOutOfRange => "Temperature out of range",
            DeviceStatus::InvalidFilterPosition => "Invalid filter position",
            DeviceStatus::NotConnected => "Camera not connected",
            DeviceStatus::ExposureInProgress => "Exposure in progress",
            DeviceStatus::TriggerTimeout => "External trigger timed out",
            DeviceStatus::NotSupported => "Operation not supported by firmware",
        }
    }
}

/// Describe a raw status byte, including ones this crate does not know.
pub fn describe_status(byte: u8) -> &'static str {
    DeviceStatus::from_byte(byte)
        .map(|s| s.description())
        .unwrap_or("Unknown device error")
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Check if a PID belongs to a high-speed FIFO camera.
pub fn is_high_speed_pid(pid: u16) -> bool {
    HIGH_SPEED_PIDS.contains(&pid)
}

/// Check if a VID/PID combination is a supported camera.
pub fn is_compatible_device(vid: u16, pid: u16) -> bool {
    vid == CAMERA_VID && (FULL_SPEED_PIDS.contains(&pid) || is_high_speed_pid(pid))
}

/// Payload bytes per bulk transfer for a bridge with the given packet size.
pub fn usb_block_size(packet_size: usize) -> usize {
    USB_PACKETS_PER_TRANSFER * (packet_size - USB_PACKET_STATUS_BYTES)
}
