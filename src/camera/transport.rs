//! Byte-stream transport layer for camera communication.
//!
//! Provides a trait-based abstraction over the physical link so the framer
//! and protocol engine can run against real hardware or a test double.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::config::{
    usb_block_size, FIFO_SETTLE_DELAY, FULL_SPEED_PACKET_SIZE, HIGH_SPEED_PACKET_SIZE,
    NORMAL_TIMEOUT_MS, USB_BAUD_RATE,
};
use super::device::{resolve_usb, ConnectionKind, DeviceIdentity};
use super::error::{CameraError, CameraResult};

/// Bytes waiting in each direction of a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub rx_pending: usize,
    pub tx_pending: usize,
}

impl QueueStatus {
    pub fn is_clean(&self) -> bool {
        self.rx_pending == 0 && self.tx_pending == 0
    }
}

/// Trait for camera transport operations.
///
/// At most one exchange is in flight on a transport at a time; callers
/// serialize access.
#[cfg_attr(test, mockall::automock)]
pub trait CameraTransport: Send {
    /// Open the link to the camera described by `identity`.
    fn open(&mut self, identity: &DeviceIdentity) -> CameraResult<()>;

    /// Close the link. Closing a closed transport is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Read up to `buffer.len()` bytes.
    ///
    /// Returns 0 when the read timeout expired with nothing received.
    fn read(&mut self, buffer: &mut [u8]) -> CameraResult<usize>;

    /// Write `data`, returning how many bytes the link accepted.
    fn write(&mut self, data: &[u8]) -> CameraResult<usize>;

    /// Bytes pending in the receive and transmit queues.
    fn queue_status(&mut self) -> CameraResult<QueueStatus>;

    /// Discard everything pending in both directions.
    fn purge(&mut self) -> CameraResult<()>;

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> CameraResult<()>;

    /// Largest chunk a single streamed read should request.
    fn max_bytes_per_block(&self) -> usize;
}

// ============================================================================
// USB serial bridge
// ============================================================================

/// USB transport through the bridge chip's serial-port driver.
pub struct UsbTransport {
    port: Option<Box<dyn SerialPort>>,
    block_size: usize,
    write_timeout: Duration,
}

impl Default for UsbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport {
    pub fn new() -> Self {
        Self {
            port: None,
            block_size: usb_block_size(FULL_SPEED_PACKET_SIZE),
            write_timeout: Duration::from_millis(NORMAL_TIMEOUT_MS),
        }
    }

    fn port_mut(&mut self) -> CameraResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(CameraError::NotConnected)
    }

    /// Open the serial port, retrying while the driver reports it is not ready.
    ///
    /// A freshly enumerated bridge can show up in the port list before its
    /// driver accepts opens.
    fn open_port(port_name: &str) -> CameraResult<Box<dyn SerialPort>> {
        const MAX_OPEN_RETRIES: u32 = 10;
        const RETRY_DELAY_MS: u64 = 200;

        let normalized = normalize_port_name(port_name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match serialport::new(&normalized, USB_BAUD_RATE)
                .timeout(Duration::from_millis(NORMAL_TIMEOUT_MS))
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::Hardware)
                .open()
            {
                Ok(port) => return Ok(port),
                Err(e) if is_transient_open_error(&e) && attempt < MAX_OPEN_RETRIES => {
                    debug!(port = port_name, attempt, error = %e, "port not ready, retrying open");
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                }
                Err(e) => return Err(classify_open_error(port_name, e)),
            }
        }
    }
}

impl CameraTransport for UsbTransport {
    fn open(&mut self, identity: &DeviceIdentity) -> CameraResult<()> {
        if identity.kind == ConnectionKind::Tcp {
            return Err(CameraError::OpenFailed {
                identity: identity.display_label(),
                reason: "not a USB identity".to_string(),
            });
        }
        self.close();

        let resolved = match &identity.port {
            Some(_) if identity.serial_number.is_none() => identity.clone(),
            _ => resolve_usb(identity)?,
        };
        let port_name = resolved.port.as_deref().ok_or(CameraError::NoDeviceFound)?;

        let mut port = Self::open_port(port_name)?;
        port.clear(serialport::ClearBuffer::All)?;

        let high_speed = resolved.kind == ConnectionKind::UsbHighSpeed
            || identity.kind == ConnectionKind::UsbHighSpeed;
        if high_speed {
            std::thread::sleep(FIFO_SETTLE_DELAY);
            self.block_size = usb_block_size(HIGH_SPEED_PACKET_SIZE);
        } else {
            self.block_size = usb_block_size(FULL_SPEED_PACKET_SIZE);
        }

        info!(port = port_name, high_speed, "opened USB camera link");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed USB camera link");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buffer: &mut [u8]) -> CameraResult<usize> {
        let port = self.port_mut()?;
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(CameraError::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> CameraResult<usize> {
        let write_timeout = self.write_timeout;
        let port = self.port_mut()?;
        let read_timeout = port.timeout();
        port.set_timeout(write_timeout)?;
        let written = match port.write(data) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => {
                port.set_timeout(read_timeout).ok();
                return Err(CameraError::Io(e));
            }
        };
        port.flush()?;
        port.set_timeout(read_timeout)?;
        Ok(written)
    }

    fn queue_status(&mut self) -> CameraResult<QueueStatus> {
        let port = self.port_mut()?;
        Ok(QueueStatus {
            rx_pending: port.bytes_to_read()? as usize,
            tx_pending: port.bytes_to_write()? as usize,
        })
    }

    fn purge(&mut self) -> CameraResult<()> {
        self.port_mut()?.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> CameraResult<()> {
        self.write_timeout = write;
        self.port_mut()?.set_timeout(read)?;
        Ok(())
    }

    fn max_bytes_per_block(&self) -> usize {
        self.block_size
    }
}

/// Driver-not-ready errors seen right after USB enumeration.
fn is_transient_open_error(e: &serialport::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("not functioning")
        || msg.contains("temporarily unavailable")
        || msg.contains("interrupted")
}

/// Map a serial open failure onto the transport error it represents.
fn classify_open_error(port_name: &str, e: serialport::Error) -> CameraError {
    let msg = e.to_string().to_lowercase();
    match e.kind() {
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            CameraError::PortPermissionDenied {
                port: port_name.to_string(),
            }
        }
        serialport::ErrorKind::NoDevice
        | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => CameraError::NoDeviceFound,
        _ if msg.contains("busy") || msg.contains("in use") => CameraError::PortBusy {
            port: port_name.to_string(),
        },
        _ => {
            warn!(port = port_name, error = %e, "unclassified port open failure");
            CameraError::Serial(e)
        }
    }
}

/// Normalize a port name for cross-platform compatibility.
fn normalize_port_name(name: &str) -> String {
    #[cfg(target_os = "macos")]
    {
        if name.starts_with("/dev/tty.") {
            return name.replace("/dev/tty.", "/dev/cu.");
        }
    }

    #[cfg(target_os = "windows")]
    {
        // COM ports above 9 need the device namespace prefix
        if let Some(n) = name.strip_prefix("COM").and_then(|n| n.parse::<u32>().ok()) {
            if n > 9 {
                return format!("\\\\.\\{}", name);
            }
        }
    }

    name.to_string()
}
