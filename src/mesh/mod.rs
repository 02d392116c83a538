//! # Mesh Radio Link
//!
//! The station talks to a Meshtastic node over a plain text UART: each
//! outbound relay summary is one line, and anything the node prints back is
//! treated as candidate mesh chat. The same wire also carries line noise when
//! the radio is unplugged or browning out, so every inbound byte goes through
//! [`health::LinkHealth`] before it reaches the display.
//!
//! - [`Transport`]: byte-stream collaborator (serial port, mock, log sink)
//! - [`MeshLink`]: transport plus health state; the only way to send or receive
//! - [`relay::RelayFramer`]: bounded, paced outbound staging queue

pub mod health;
pub mod relay;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::logutil::escape_log;
use crate::metrics;
use health::{HealthState, Inbound, LinkHealth};

/// Byte-stream transport to the radio.
pub trait Transport: Send {
    /// Write one line; the terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> io::Result<()>;
    /// Bytes ready to read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;
    /// Block up to `timeout` for one byte. `Ok(None)` on timeout.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;
}

/// A validated inbound mesh chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MockInner {
    inbound: VecDeque<u8>,
    sent: Vec<String>,
    fail_writes: bool,
}

/// In-memory transport. Clones share buffers so a test can feed bytes and
/// inspect writes while the link owns its own handle.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.inbound.extend(bytes.iter().copied());
        }
    }

    pub fn sent(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.sent.clone())
            .unwrap_or_default()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inner.lock().map(|inner| inner.inbound.len()).unwrap_or(0)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_writes = fail;
        }
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "mock transport lock poisoned")
}

impl Transport for MockTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure"));
        }
        inner.sent.push(line.to_string());
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.inbound.len())
    }

    // Never blocks: an empty buffer is an immediate timeout.
    fn read_byte(&mut self, _timeout: Duration) -> io::Result<Option<u8>> {
        Ok(self.inner.lock().map_err(|_| poisoned())?.inbound.pop_front())
    }
}

/// Transport used when no radio is attached: lines go to the log, nothing
/// ever arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        info!("[MESH] (no radio) Bot> {}", escape_log(line));
        Ok(())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    fn read_byte(&mut self, _timeout: Duration) -> io::Result<Option<u8>> {
        Ok(None)
    }
}

/// UART connection to the radio node.
#[cfg(feature = "serial")]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    /// Open the port 8N1, raise DTR/RTS and drop any boot chatter already buffered.
    pub async fn open(port_name: &str, baud_rate: u32) -> anyhow::Result<Self> {
        use anyhow::anyhow;
        use std::io::Read;

        info!("[MESH] opening {} at {} baud", port_name, baud_rate);
        let mut builder =
            serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }
        debug!("[MESH] serial port ready");
        Ok(Self { port })
    }
}

#[cfg(feature = "serial")]
impl Transport for SerialTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        use std::io::Write;
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        use std::io::Read;
        self.port.set_timeout(timeout)?;
        let mut byte = [0u8; 1];
        match self.port.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Transport plus inbound health tracking.
pub struct MeshLink {
    transport: Box<dyn Transport>,
    health: LinkHealth,
}

impl MeshLink {
    pub fn new(transport: Box<dyn Transport>, health: LinkHealth) -> Self {
        Self { transport, health }
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    pub fn state(&self) -> HealthState {
        self.health.state()
    }

    /// Outbound traffic is suppressed while the link is disabled.
    pub fn can_send(&self) -> bool {
        !self.health.is_disabled()
    }

    /// Send one line. Returns false when suppressed or the write failed.
    pub fn send_line(&mut self, line: &str) -> bool {
        if !self.can_send() {
            debug!("[MESH] link disabled, not sending: {}", escape_log(line));
            return false;
        }
        match self.transport.write_line(line) {
            Ok(()) => {
                info!("[MESH] Bot> {}", escape_log(line));
                metrics::inc_relay_sent();
                true
            }
            Err(e) => {
                warn!("[MESH] write failed: {}", e);
                false
            }
        }
    }

    /// Check the wire for one inbound message. Also applies time-based decay.
    pub fn poll(&mut self) -> Option<ChatMessage> {
        self.health.decay();
        match self.transport.bytes_available() {
            Ok(0) => return None,
            Ok(_) => {}
            Err(e) => {
                warn!("[MESH] bytes_available failed: {}", e);
                return None;
            }
        }
        match self.health.read_message(self.transport.as_mut()) {
            Ok(Inbound::Chat(msg)) => Some(msg),
            Ok(_) => None,
            Err(e) => {
                warn!("[MESH] read failed: {}", e);
                None
            }
        }
    }

    /// Manual reset: clear the health state and discard anything buffered.
    pub fn reset(&mut self) {
        let drained = self.health.drain(self.transport.as_mut());
        self.health.reset();
        info!("[MESH] link reset ({} buffered bytes discarded)", drained);
    }
}
