//! Camera discovery and connection identities.
//!
//! USB cameras are found by scanning serial ports for the bridge VID/PID.
//! Network cameras have no discovery; the caller supplies the address.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};

use super::config::{
    is_compatible_device, is_high_speed_pid, CAMERA_TCP_PORT, CAMERA_VID, FULL_SPEED_PIDS,
};
use super::error::{CameraError, CameraResult};

/// Physical link a camera is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionKind {
    /// Full-speed serial bridge.
    Usb,
    /// High-speed bridge with a synchronous FIFO.
    UsbHighSpeed,
    /// Network interface.
    Tcp,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionKind::Usb => f.write_str("USB"),
            ConnectionKind::UsbHighSpeed => f.write_str("USB (high speed)"),
            ConnectionKind::Tcp => f.write_str("TCP"),
        }
    }
}

/// Everything needed to open a connection to one camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub kind: ConnectionKind,
    pub vid: u16,
    pub pid: u16,
    /// USB serial number (if reported).
    pub serial_number: Option<String>,
    /// Product description (if reported).
    pub description: Option<String>,
    /// Network address, TCP only.
    pub address: Option<Ipv4Addr>,
    /// Resolved serial port path, USB only.
    pub port: Option<String>,
}

impl DeviceIdentity {
    /// Display label used in logs and CLI listings.
    pub fn display_label(&self) -> String {
        match (self.kind, &self.address, &self.serial_number) {
            (ConnectionKind::Tcp, Some(addr), _) => format!("{}:{}", addr, CAMERA_TCP_PORT),
            (_, _, Some(serial)) => format!(
                "{} [{}]",
                self.description.as_deref().unwrap_or("CCD camera"),
                serial
            ),
            _ => format!(
                "{} ({})",
                self.description.as_deref().unwrap_or("CCD camera"),
                self.port.as_deref().unwrap_or("unresolved")
            ),
        }
    }

    /// Whether `other` refers to the same physical camera.
    pub fn matches(&self, other: &DeviceIdentity) -> bool {
        if self.kind == ConnectionKind::Tcp || other.kind == ConnectionKind::Tcp {
            return self.kind == other.kind && self.address == other.address;
        }
        self.vid == other.vid
            && self.pid == other.pid
            && match (&self.serial_number, &other.serial_number) {
                (Some(a), Some(b)) => a == b,
                _ => self.port == other.port,
            }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_label())
    }
}

/// Identity of a network camera at `address`.
pub fn tcp_identity(address: Ipv4Addr) -> DeviceIdentity {
    DeviceIdentity {
        kind: ConnectionKind::Tcp,
        vid: 0,
        pid: 0,
        serial_number: None,
        description: Some("Network CCD camera".to_string()),
        address: Some(address),
        port: None,
    }
}

/// Identity of a USB camera known only by serial number, resolved on open.
pub fn usb_identity_by_serial(serial: &str) -> DeviceIdentity {
    DeviceIdentity {
        kind: ConnectionKind::Usb,
        vid: CAMERA_VID,
        pid: FULL_SPEED_PIDS[0],
        serial_number: Some(serial.to_string()),
        description: None,
        address: None,
        port: None,
    }
}

/// Find all attached USB cameras.
///
/// On macOS each bridge shows up as both `cu.*` and `tty.*`; only `cu.*` is
/// listed.
pub fn find_usb_cameras() -> Vec<DeviceIdentity> {
    let mut cameras = Vec::new();

    let ports = match available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            tracing::warn!(error = %e, "serial port enumeration failed");
            return cameras;
        }
    };

    for port in ports {
        #[cfg(target_os = "macos")]
        if port.port_name.contains("/dev/tty.") {
            continue;
        }

        if let SerialPortType::UsbPort(usb_info) = &port.port_type {
            if is_compatible_device(usb_info.vid, usb_info.pid) {
                let kind = if is_high_speed_pid(usb_info.pid) {
                    ConnectionKind::UsbHighSpeed
                } else {
                    ConnectionKind::Usb
                };
                cameras.push(DeviceIdentity {
                    kind,
                    vid: usb_info.vid,
                    pid: usb_info.pid,
                    serial_number: usb_info.serial_number.clone(),
                    description: usb_info.product.clone(),
                    address: None,
                    port: Some(port.port_name.clone()),
                });
            }
        }
    }

    cameras
}

/// Resolve an identity to an attached camera's serial port.
///
/// Matches on serial number when the identity has one; otherwise on the
/// port path. The returned identity carries the port and the detected kind.
pub fn resolve_usb(identity: &DeviceIdentity) -> CameraResult<DeviceIdentity> {
    let found = find_usb_cameras();
    let hit = match &identity.serial_number {
        Some(serial) => found
            .into_iter()
            .find(|d| d.serial_number.as_deref() == Some(serial.as_str())),
        None => found.into_iter().find(|d| match &identity.port {
            Some(port) => d.port.as_deref() == Some(port.as_str()),
            None => true,
        }),
    };
    hit.ok_or(CameraError::NoDeviceFound)
}
