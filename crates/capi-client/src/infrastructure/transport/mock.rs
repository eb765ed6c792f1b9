//! Scripted transport for unit and integration testing.
//!
//! Tests queue the bytes the device would send, hand the mock to the engine,
//! and afterwards inspect every frame the engine wrote. Shared handles make
//! the inspection possible after the mock is boxed behind the
//! [`Transport`](super::Transport) trait.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use capi_core::protocol::command::CommSettings;
use capi_core::protocol::crc::crc16;
use capi_core::protocol::CR;

use super::{Transport, TransportError, DEFAULT_IO_TIMEOUT};

/// A [`Transport`] that replays queued replies and records every write.
///
/// Reads past the end of the script fail like a silent device: with
/// [`TransportError::TimedOut`].
pub struct MockTransport {
    connected: bool,
    inbound: Arc<Mutex<VecDeque<u8>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    breaks_sent: Arc<Mutex<u32>>,
    reconfigurations: Arc<Mutex<Vec<CommSettings>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockTransport {
    /// Creates a connected mock with an empty script.
    pub fn new() -> Self {
        Self {
            connected: true,
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            written: Arc::new(Mutex::new(Vec::new())),
            breaks_sent: Arc::new(Mutex::new(0)),
            reconfigurations: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queues a text reply the way the device frames it: body, four-hex-digit
    /// CRC, carriage return.
    pub fn queue_reply(&self, body: &str) {
        let framed = format!("{body}{:04X}\r", crc16(body.as_bytes()));
        self.queue_bytes(framed.as_bytes());
    }

    /// Queues raw bytes, for binary replies and deliberately broken frames.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.inbound
            .lock()
            .expect("lock poisoned")
            .extend(bytes.iter().copied());
    }

    /// Handle onto the recorded writes, one entry per `write_all` call.
    pub fn written_handle(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.written)
    }

    /// Recorded writes decoded as text, checksum and terminator stripped.
    pub fn written_commands(&self) -> Vec<String> {
        self.written
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|frame| {
                let text = String::from_utf8_lossy(frame);
                let text = text.strip_suffix('\r').unwrap_or(&text);
                text[..text.len().saturating_sub(4)].to_string()
            })
            .collect()
    }

    /// Handle onto the serial break counter.
    pub fn breaks_handle(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.breaks_sent)
    }

    /// Handle onto the recorded serial reconfigurations.
    pub fn reconfigurations_handle(&self) -> Arc<Mutex<Vec<CommSettings>>> {
        Arc::clone(&self.reconfigurations)
    }

    /// Makes every later write fail, simulating a dead link mid-session.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::Relaxed);
    }

    /// Bytes queued but not yet consumed by the engine.
    pub fn unread_bytes(&self) -> usize {
        self.inbound.lock().expect("lock poisoned").len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut inbound = self.inbound.lock().expect("lock poisoned");
        if inbound.len() < buf.len() {
            // Running dry mid-frame is what a silent device looks like.
            return Err(TransportError::TimedOut {
                operation: "read",
                timeout: DEFAULT_IO_TIMEOUT,
            });
        }
        for slot in buf.iter_mut() {
            *slot = inbound.pop_front().expect("length checked above");
        }
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.written
            .lock()
            .expect("lock poisoned")
            .push(bytes.to_vec());
        Ok(())
    }

    fn name(&self) -> String {
        "mock".to_string()
    }

    async fn send_break(&mut self) -> Result<(), TransportError> {
        *self.breaks_sent.lock().expect("lock poisoned") += 1;
        Ok(())
    }

    async fn reconfigure(&mut self, settings: &CommSettings) -> Result<(), TransportError> {
        self.reconfigurations
            .lock()
            .expect("lock poisoned")
            .push(*settings);
        Ok(())
    }
}
