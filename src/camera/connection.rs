//! Connection selection: picks the transport for an identity.

use std::time::Duration;

use tracing::{info, warn};

use super::device::{ConnectionKind, DeviceIdentity};
use super::error::{CameraError, CameraResult};
use super::tcp::TcpTransport;
use super::transport::{CameraTransport, QueueStatus, UsbTransport};

/// Concrete transport chosen at connect time.
pub enum AnyTransport {
    Usb(UsbTransport),
    Tcp(TcpTransport),
}

impl AnyTransport {
    /// Unopened transport matching the identity's connection kind.
    pub fn for_identity(identity: &DeviceIdentity) -> Self {
        match identity.kind {
            ConnectionKind::Usb | ConnectionKind::UsbHighSpeed => {
                AnyTransport::Usb(UsbTransport::new())
            }
            ConnectionKind::Tcp => AnyTransport::Tcp(TcpTransport::new()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            AnyTransport::Usb(_) => "usb",
            AnyTransport::Tcp(_) => "tcp",
        }
    }

    fn inner(&self) -> &dyn CameraTransport {
        match self {
            AnyTransport::Usb(t) => t,
            AnyTransport::Tcp(t) => t,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CameraTransport {
        match self {
            AnyTransport::Usb(t) => t,
            AnyTransport::Tcp(t) => t,
        }
    }
}

impl CameraTransport for AnyTransport {
    fn open(&mut self, identity: &DeviceIdentity) -> CameraResult<()> {
        self.inner_mut().open(identity)
    }

    fn close(&mut self) {
        self.inner_mut().close()
    }

    fn is_open(&self) -> bool {
        self.inner().is_open()
    }

    fn read(&mut self, buffer: &mut [u8]) -> CameraResult<usize> {
        self.inner_mut().read(buffer)
    }

    fn write(&mut self, data: &[u8]) -> CameraResult<usize> {
        self.inner_mut().write(data)
    }

    fn queue_status(&mut self) -> CameraResult<QueueStatus> {
        self.inner_mut().queue_status()
    }

    fn purge(&mut self) -> CameraResult<()> {
        self.inner_mut().purge()
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> CameraResult<()> {
        self.inner_mut().set_timeouts(read, write)
    }

    fn max_bytes_per_block(&self) -> usize {
        self.inner().max_bytes_per_block()
    }
}

/// Open a transport for `identity`.
pub fn open_transport(identity: &DeviceIdentity) -> CameraResult<AnyTransport> {
    let mut transport = AnyTransport::for_identity(identity);
    transport.open(identity)?;
    Ok(transport)
}

/// Open the first candidate that accepts a connection.
///
/// Open failure is terminal for an identity, so each candidate is tried once
/// in order. Returns the last error if none opens.
pub fn open_first(
    candidates: &[DeviceIdentity],
) -> CameraResult<(DeviceIdentity, AnyTransport)> {
    let mut last_error = CameraError::NoDeviceFound;
    for identity in candidates {
        match open_transport(identity) {
            Ok(transport) => {
                info!(camera = %identity, transport = transport.kind_name(), "selected camera");
                return Ok((identity.clone(), transport));
            }
            Err(e) => {
                warn!(camera = %identity, error = %e, "camera failed to open, trying next");
                last_error = e;
            }
        }
    }
    Err(last_error)
}
