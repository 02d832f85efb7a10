//! Request/response framing over a transport.
//!
//! One call to [`PacketFramer::exchange`] writes one request packet and reads
//! back exactly one response packet, enforcing queue cleanliness around it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::config::{
    Command, LONG_TIMEOUT_MARGIN, NORMAL_TIMEOUT_MS, PACKET_HEADER_SIZE, SHORT_TIMEOUT_MS,
};
use super::error::{CameraError, CameraResult, QueuePhase};
use super::packet::{hex_preview, Packet, PacketHeader};
use super::transport::CameraTransport;

/// Bytes of each packet shown in trace logs.
const LOG_PREVIEW_BYTES: usize = 16;

/// Timeout durations for each exchange class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutConfig {
    pub normal_ms: u64,
    pub short_ms: u64,
    pub long_margin_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            normal_ms: NORMAL_TIMEOUT_MS,
            short_ms: SHORT_TIMEOUT_MS,
            long_margin_ms: LONG_TIMEOUT_MARGIN.as_millis() as u64,
        }
    }
}

impl TimeoutConfig {
    pub fn normal(&self) -> Duration {
        Duration::from_millis(self.normal_ms)
    }

    /// Concrete duration for a timeout class.
    pub fn resolve(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Normal => self.normal(),
            TimeoutClass::Short => Duration::from_millis(self.short_ms),
            TimeoutClass::Long(extra) => extra + Duration::from_millis(self.long_margin_ms),
        }
    }
}

/// Timeout class applied for the duration of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Normal,
    /// Capability probes that must fail fast.
    Short,
    /// Commands whose acknowledgement may wait out an exposure of the given length.
    Long(Duration),
}

/// Per-exchange framing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub timeout: TimeoutClass,
    pub check_before: bool,
    pub check_after: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            timeout: TimeoutClass::Normal,
            check_before: true,
            check_after: true,
        }
    }
}

impl ExchangeOptions {
    /// Options for a command whose response is followed by streamed data.
    pub fn streaming() -> Self {
        Self {
            check_after: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: TimeoutClass) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Packet framer owning the active transport.
pub struct PacketFramer<T: CameraTransport> {
    transport: T,
    timeouts: TimeoutConfig,
}

impl<T: CameraTransport> PacketFramer<T> {
    pub fn new(transport: T, timeouts: TimeoutConfig) -> Self {
        Self {
            transport,
            timeouts,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: TimeoutConfig) {
        self.timeouts = timeouts;
    }

    /// Put the transport back on the normal timeout.
    pub fn apply_normal_timeouts(&mut self) -> CameraResult<()> {
        let normal = self.timeouts.normal();
        self.transport.set_timeouts(normal, normal)
    }

    /// Run `op` with the transport on `class` timeouts, restoring the normal
    /// timeout afterwards whether or not `op` succeeded.
    pub fn with_timeout<R>(
        &mut self,
        class: TimeoutClass,
        op: impl FnOnce(&mut Self) -> CameraResult<R>,
    ) -> CameraResult<R> {
        if class == TimeoutClass::Normal {
            return op(self);
        }
        let scoped = self.timeouts.resolve(class);
        self.transport.set_timeouts(scoped, scoped)?;
        let result = op(self);
        let restored = self.apply_normal_timeouts();
        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// Exchange one request for one response.
    pub fn exchange(&mut self, request: &Packet, options: ExchangeOptions) -> CameraResult<Packet> {
        if options.check_before {
            self.ensure_clean(QueuePhase::Before)?;
        }

        let response = self.with_timeout(options.timeout, |framer| {
            framer.send(request)?;
            framer.receive()
        })?;

        if response.command() != request.command() {
            return Err(CameraError::CommandMismatch {
                expected: request.command(),
                actual: response.command(),
            });
        }

        if options.check_after {
            self.ensure_clean(QueuePhase::After)?;
        }

        Ok(response)
    }

    fn send(&mut self, request: &Packet) -> CameraResult<()> {
        let frame = request.encode();
        trace!(
            command = %command_label(request.command()),
            bytes = %hex_preview(&frame, LOG_PREVIEW_BYTES),
            "tx"
        );
        let written = self.transport.write(&frame)?;
        if written != frame.len() {
            return Err(CameraError::ShortWrite {
                expected: frame.len(),
                written,
            });
        }
        Ok(())
    }

    fn receive(&mut self) -> CameraResult<Packet> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        self.read_exact(&mut header)?;
        let parsed = PacketHeader::parse(&header)?;

        let mut frame = vec![0u8; PACKET_HEADER_SIZE + parsed.payload_len];
        frame[..PACKET_HEADER_SIZE].copy_from_slice(&header);
        self.read_exact(&mut frame[PACKET_HEADER_SIZE..])
            .map_err(|e| match e {
                CameraError::ShortRead { expected, received } => CameraError::ShortRead {
                    expected: expected + PACKET_HEADER_SIZE,
                    received: received + PACKET_HEADER_SIZE,
                },
                other => other,
            })?;

        trace!(
            command = %command_label(parsed.command),
            bytes = %hex_preview(&frame, LOG_PREVIEW_BYTES),
            "rx"
        );
        Packet::decode(&frame)
    }

    /// Fill `buffer` completely; a timed-out read is a short read.
    fn read_exact(&mut self, buffer: &mut [u8]) -> CameraResult<()> {
        let mut received = 0;
        while received < buffer.len() {
            let n = self.transport.read(&mut buffer[received..])?;
            if n == 0 {
                return Err(CameraError::ShortRead {
                    expected: buffer.len(),
                    received,
                });
            }
            received += n;
        }
        Ok(())
    }

    /// Read a streamed block that follows a response, in transport-sized chunks.
    pub fn read_stream(&mut self, buffer: &mut [u8]) -> CameraResult<()> {
        let block = self.transport.max_bytes_per_block().max(1);
        let total = buffer.len();
        let mut offset = 0;
        while offset < total {
            let end = (offset + block).min(total);
            self.read_exact(&mut buffer[offset..end]).map_err(|e| match e {
                CameraError::ShortRead { received, .. } => CameraError::ShortRead {
                    expected: total,
                    received: offset + received,
                },
                other => other,
            })?;
            offset = end;
        }
        Ok(())
    }

    /// Verify both queues are empty, draining and reporting stray input.
    pub fn ensure_clean(&mut self, phase: QueuePhase) -> CameraResult<()> {
        let status = self.transport.queue_status()?;
        if status.is_clean() {
            return Ok(());
        }

        if status.rx_pending > 0 {
            let mut stray = vec![0u8; status.rx_pending];
            let mut got = 0;
            while got < stray.len() {
                match self.transport.read(&mut stray[got..])? {
                    0 => break,
                    n => got += n,
                }
            }
            warn!(
                %phase,
                rx_pending = status.rx_pending,
                tx_pending = status.tx_pending,
                stray = %hex_preview(&stray[..got], stray.len()),
                "queue was dirty, discarding"
            );
        } else {
            warn!(%phase, tx_pending = status.tx_pending, "transmit queue was dirty, purging");
        }
        self.transport.purge()?;

        Err(CameraError::DirtyQueue {
            phase,
            rx_pending: status.rx_pending,
            tx_pending: status.tx_pending,
        })
    }
}

fn command_label(code: u8) -> String {
    match Command::from_byte(code) {
        Some(command) => command.name().to_string(),
        None => format!("0x{:02X}", code),
    }
}
