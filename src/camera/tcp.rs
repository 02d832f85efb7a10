//! Network transport for cameras with an Ethernet interface.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use super::config::{CAMERA_TCP_PORT, TCP_BLOCK_SIZE, TCP_CONNECT_TIMEOUT};
use super::device::{ConnectionKind, DeviceIdentity};
use super::error::{CameraError, CameraResult};
use super::transport::{CameraTransport, QueueStatus};

/// TCP transport to a camera's network interface.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    port: u16,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_port(CAMERA_TCP_PORT)
    }

    /// Transport that connects to a non-standard port.
    pub fn with_port(port: u16) -> Self {
        Self { stream: None, port }
    }

    fn stream_mut(&mut self) -> CameraResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(CameraError::NotConnected)
    }
}

impl CameraTransport for TcpTransport {
    fn open(&mut self, identity: &DeviceIdentity) -> CameraResult<()> {
        let address = match (identity.kind, identity.address) {
            (ConnectionKind::Tcp, Some(address)) => address,
            _ => {
                return Err(CameraError::OpenFailed {
                    identity: identity.display_label(),
                    reason: "no network address".to_string(),
                })
            }
        };
        self.close();

        let target = SocketAddr::from((address, self.port));
        let stream = TcpStream::connect_timeout(&target, TCP_CONNECT_TIMEOUT).map_err(|e| {
            CameraError::OpenFailed {
                identity: target.to_string(),
                reason: e.to_string(),
            }
        })?;
        stream.set_nodelay(true)?;

        info!(%target, "opened TCP camera link");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.shutdown(std::net::Shutdown::Both).ok();
            debug!("closed TCP camera link");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buffer: &mut [u8]) -> CameraResult<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let stream = self.stream_mut()?;
        match stream.read(buffer) {
            Ok(0) => Err(CameraError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "camera closed the connection",
            ))),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(CameraError::Io(e)),
        }
    }

    fn write(&mut self, data: &[u8]) -> CameraResult<usize> {
        let stream = self.stream_mut()?;
        match stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) => Err(CameraError::Io(e)),
        }
    }

    fn queue_status(&mut self) -> CameraResult<QueueStatus> {
        let stream = self.stream_mut()?;
        let mut probe = [0u8; 4096];
        stream.set_nonblocking(true)?;
        let peeked = stream.peek(&mut probe);
        stream.set_nonblocking(false)?;
        let rx_pending = match peeked {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => return Err(CameraError::Io(e)),
        };
        // Sent bytes leave the socket buffer without any way to observe them.
        Ok(QueueStatus {
            rx_pending,
            tx_pending: 0,
        })
    }

    fn purge(&mut self) -> CameraResult<()> {
        let stream = self.stream_mut()?;
        let mut sink = [0u8; 4096];
        stream.set_nonblocking(true)?;
        let drained = loop {
            match stream.read(&mut sink) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(CameraError::Io(e)),
            }
        };
        stream.set_nonblocking(false)?;
        drained
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> CameraResult<()> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(read))?;
        stream.set_write_timeout(Some(write))?;
        Ok(())
    }

    fn max_bytes_per_block(&self) -> usize {
        TCP_BLOCK_SIZE
    }
}
