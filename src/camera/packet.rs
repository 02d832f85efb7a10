//! Packet encoding for the camera command link.
//!
//! Every exchange is one request packet and one response packet of the same
//! shape:
//!
//! ```text
//! +---------+--------+----------------------+
//! | command | length | payload (0..=124)    |
//! +---------+--------+----------------------+
//! ```
//!
//! There is no checksum. Integrity relies on the transport and on the
//! response echoing the request's command byte. Multi-byte payload fields are
//! big-endian.

use super::config::{Command, MAX_PAYLOAD_SIZE, PACKET_HEADER_SIZE};
use super::error::{CameraError, CameraResult};

// ============================================================================
// Packet
// ============================================================================

/// One request or response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet, rejecting payloads over the protocol limit.
    pub fn new(command: u8, payload: Vec<u8>) -> CameraResult<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(CameraError::PayloadTooLarge {
                size: payload.len(),
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { command, payload })
    }

    /// Build a request with no payload.
    pub fn request(command: Command) -> Self {
        Self {
            command: command.code(),
            payload: Vec::new(),
        }
    }

    /// Build a request from a payload writer.
    pub fn with_payload(command: Command, payload: PayloadWriter) -> CameraResult<Self> {
        Self::new(command.code(), payload.into_bytes())
    }

    /// Command byte.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Framed size on the wire.
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Encode the packet into `out`, replacing its contents.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.wire_len());
        out.push(self.command);
        out.push(self.payload.len() as u8);
        out.extend_from_slice(&self.payload);
    }

    /// Encode the packet into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }

    /// Decode a complete framed packet.
    ///
    /// The buffer must contain exactly the header and the declared payload.
    pub fn decode(frame: &[u8]) -> CameraResult<Self> {
        let header = PacketHeader::parse(frame)?;
        let expected = PACKET_HEADER_SIZE + header.payload_len;
        if frame.len() < expected {
            return Err(CameraError::ShortRead {
                expected,
                received: frame.len(),
            });
        }
        if frame.len() > expected {
            return Err(CameraError::PayloadTooLarge {
                size: frame.len() - PACKET_HEADER_SIZE,
                max_size: header.payload_len,
            });
        }
        Ok(Self {
            command: header.command,
            payload: frame[PACKET_HEADER_SIZE..].to_vec(),
        })
    }

    /// Split the trailing device status byte from a response payload.
    ///
    /// Returns the body without the status byte, or a device error if the
    /// firmware reported a failure.
    pub fn into_body(self, command: Command) -> CameraResult<Vec<u8>> {
        let mut payload = self.payload;
        let status = payload.pop().ok_or_else(|| CameraError::MalformedResponse {
            command,
            reason: "missing status byte".to_string(),
        })?;
        if status != 0 {
            return Err(CameraError::Device { command, status });
        }
        Ok(payload)
    }
}

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub command: u8,
    pub payload_len: usize,
}

impl PacketHeader {
    /// Parse and validate the two header bytes.
    pub fn parse(bytes: &[u8]) -> CameraResult<Self> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(CameraError::ShortRead {
                expected: PACKET_HEADER_SIZE,
                received: bytes.len(),
            });
        }
        let payload_len = bytes[1] as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(CameraError::PayloadTooLarge {
                size: payload_len,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            command: bytes[0],
            payload_len,
        })
    }
}

// ============================================================================
// Payload Builders
// ============================================================================

/// Big-endian payload builder.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    bytes: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    pub fn bool(self, value: bool) -> Self {
        self.u8(value as u8)
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn i16(mut self, value: i16) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append the low 24 bits of `value`.
    pub fn u24(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes()[1..]);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Bounds-checked big-endian reader over a response body.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    command: Command,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(command: Command, bytes: &'a [u8]) -> Self {
        Self {
            command,
            bytes,
            offset: 0,
        }
    }

    fn take(&mut self, n: usize) -> CameraResult<&'a [u8]> {
        let end = self.offset + n;
        if end > self.bytes.len() {
            return Err(CameraError::MalformedResponse {
                command: self.command,
                reason: format!(
                    "needed {} bytes at offset {}, body has {}",
                    n,
                    self.offset,
                    self.bytes.len()
                ),
            });
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> CameraResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> CameraResult<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> CameraResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> CameraResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> CameraResult<u32> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Fixed-width NUL-padded ASCII field.
    pub fn string(&mut self, width: usize) -> CameraResult<String> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).trim().to_string())
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

/// Hex dump of at most `limit` bytes, for packet logging.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let mut out: Vec<String> = bytes
        .iter()
        .take(limit)
        .map(|b| format!("{:02X}", b))
        .collect();
    if bytes.len() > limit {
        out.push(format!("... (+{} bytes)", bytes.len() - limit));
    }
    out.join(" ")
}

/// Decode a little-endian 16-bit pixel stream.
pub fn decode_pixels(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
