use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::camera::config::usb_block_size;
use crate::camera::config::HIGH_SPEED_PACKET_SIZE;
use crate::camera::device::DeviceIdentity;
use crate::camera::error::{CameraError, CameraResult};
use crate::camera::transport::{CameraTransport, QueueStatus};

#[derive(Default)]
struct ScriptState {
    open: bool,
    fail_open: bool,
    rx: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    timeouts: Vec<Duration>,
    purges: usize,
    closes: usize,
    write_limit: Option<usize>,
}

/// In-memory transport that plays back scripted device replies.
///
/// Each write releases the next queued reply into the receive buffer; an empty
/// reply models a device that never answers. Clones share state, so a test
/// can keep a handle while the engine owns the transport.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Closed transport; opening it succeeds unless `fail_open` was called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that is already open.
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.state.lock().open = true;
        transport
    }

    /// Queue raw reply bytes for the next write.
    pub fn reply(&self, bytes: &[u8]) {
        self.state.lock().replies.push_back(bytes.to_vec());
    }

    /// Queue a framed response: command, length, body, status.
    pub fn reply_packet(&self, command: u8, body: &[u8], status: u8) {
        self.reply(&response(command, body, status));
    }

    /// Queue a framed response followed by streamed bytes.
    pub fn reply_with_stream(&self, command: u8, body: &[u8], stream: &[u8]) {
        let mut bytes = response(command, body, 0);
        bytes.extend_from_slice(stream);
        self.reply(&bytes);
    }

    /// Put bytes in the receive queue without a request.
    pub fn inject_stray(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Accept at most `n` bytes per write.
    pub fn limit_write(&self, n: usize) {
        self.state.lock().write_limit = Some(n);
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Every frame written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Command byte of every frame written so far.
    pub fn written_commands(&self) -> Vec<u8> {
        self.state
            .lock()
            .written
            .iter()
            .filter_map(|frame| frame.first().copied())
            .collect()
    }

    pub fn pending(&self) -> QueueStatus {
        QueueStatus {
            rx_pending: self.state.lock().rx.len(),
            tx_pending: 0,
        }
    }

    pub fn purge_count(&self) -> usize {
        self.state.lock().purges
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Read timeouts applied, in order.
    pub fn timeout_history(&self) -> Vec<Duration> {
        self.state.lock().timeouts.clone()
    }

    /// Replies queued but not yet released.
    pub fn unused_replies(&self) -> usize {
        self.state.lock().replies.len()
    }
}

/// Framed response bytes with a trailing status byte.
pub fn response(command: u8, body: &[u8], status: u8) -> Vec<u8> {
    let mut bytes = vec![command, (body.len() + 1) as u8];
    bytes.extend_from_slice(body);
    bytes.push(status);
    bytes
}

impl CameraTransport for ScriptedTransport {
    fn open(&mut self, identity: &DeviceIdentity) -> CameraResult<()> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(CameraError::OpenFailed {
                identity: identity.display_label(),
                reason: "scripted failure".to_string(),
            });
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.closes += 1;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn read(&mut self, buffer: &mut [u8]) -> CameraResult<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(CameraError::NotConnected);
        }
        let n = buffer.len().min(state.rx.len());
        for (slot, byte) in buffer.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> CameraResult<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(CameraError::NotConnected);
        }
        let accepted = state.write_limit.map_or(data.len(), |limit| limit.min(data.len()));
        state.written.push(data.to_vec());
        if let Some(reply) = state.replies.pop_front() {
            state.rx.extend(reply);
        }
        Ok(accepted)
    }

    fn queue_status(&mut self) -> CameraResult<QueueStatus> {
        let state = self.state.lock();
        if !state.open {
            return Err(CameraError::NotConnected);
        }
        Ok(QueueStatus {
            rx_pending: state.rx.len(),
            tx_pending: 0,
        })
    }

    fn purge(&mut self) -> CameraResult<()> {
        let mut state = self.state.lock();
        state.rx.clear();
        state.purges += 1;
        Ok(())
    }

    fn set_timeouts(&mut self, read: Duration, _write: Duration) -> CameraResult<()> {
        self.state.lock().timeouts.push(read);
        Ok(())
    }

    fn max_bytes_per_block(&self) -> usize {
        usb_block_size(HIGH_SPEED_PACKET_SIZE)
    }
}
