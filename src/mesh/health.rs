//! Inbound noise filter for the radio UART.
//!
//! Messages are framed by newline or by a short inactivity gap. A framed
//! message is accepted as chat when at least `min_printable_percent` of its
//! bytes are printable ASCII; otherwise it counts as garbage. A long run of
//! `0x00` or `0xFF` (a floating or shorted RX line) is a noise burst and is
//! weighted as a full threshold's worth of garbage at once.
//!
//! ```text
//! Healthy --garbage >= threshold--> Degraded(n) --n >= threshold*multiplier--> Disabled
//!    ^                                 |                                          |
//!    +------ decay (one per quiet window) / valid message --+        manual reset |
//!    +----------------------------------------------------------------------------+
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, warn};
use std::io;
use std::time::Duration;

use super::{ChatMessage, Transport};
use crate::logutil::{escape_log, preview_bytes};
use crate::metrics;
use crate::system::SharedClock;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Gap that ends a message when no terminator arrives.
    pub inactivity_timeout: Duration,
    /// Longer messages are truncated.
    pub max_message_bytes: usize,
    pub min_printable_percent: u8,
    /// Consecutive identical 0x00/0xFF bytes that count as a burst.
    pub extreme_run: usize,
    pub noise_threshold: u32,
    pub disable_multiplier: u32,
    /// Quiet period after which the garbage counter steps down by one.
    pub decay_window: ChronoDuration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_millis(100),
            max_message_bytes: 200,
            min_printable_percent: 80,
            extreme_run: 16,
            noise_threshold: 5,
            disable_multiplier: 3,
            decay_window: ChronoDuration::seconds(60),
        }
    }
}

impl HealthConfig {
    fn disable_at(&self) -> u32 {
        self.noise_threshold
            .max(1)
            .saturating_mul(self.disable_multiplier.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded(u32),
    Disabled,
}

/// What one read attempt produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chat(ChatMessage),
    Garbage,
    NoiseBurst,
    /// Nothing usable (empty line, or the link is disabled).
    Ignored,
}

/// True when printable ASCII makes up at least `percent` of `bytes` (inclusive).
pub fn printable_ratio_ok(bytes: &[u8], percent: u8) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let printable = bytes.iter().filter(|b| (0x20..=0x7E).contains(*b)).count();
    printable * 100 >= bytes.len() * percent as usize
}

pub struct LinkHealth {
    config: HealthConfig,
    clock: SharedClock,
    garbage_count: u32,
    disabled: bool,
    last_change: DateTime<Utc>,
}

impl LinkHealth {
    pub fn new(config: HealthConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            garbage_count: 0,
            disabled: false,
            last_change: now,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn garbage_count(&self) -> u32 {
        self.garbage_count
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn state(&self) -> HealthState {
        if self.disabled {
            HealthState::Disabled
        } else if self.garbage_count >= self.config.noise_threshold.max(1) {
            HealthState::Degraded(self.garbage_count)
        } else {
            HealthState::Healthy
        }
    }

    /// Step the garbage counter down once per elapsed quiet window.
    pub fn decay(&mut self) {
        if self.disabled || self.garbage_count == 0 {
            return;
        }
        let now = self.clock.now();
        let window = self.config.decay_window;
        if window <= ChronoDuration::zero() {
            return;
        }
        while self.garbage_count > 0 && now.signed_duration_since(self.last_change) >= window {
            self.garbage_count -= 1;
            self.last_change += window;
        }
        if self.garbage_count == 0 {
            debug!("[LINK] noise decayed, link healthy");
        }
    }

    fn record_garbage(&mut self, weight: u32) {
        let before = self.state();
        self.garbage_count = self.garbage_count.saturating_add(weight);
        self.last_change = self.clock.now();
        if self.garbage_count >= self.config.disable_at() {
            self.disabled = true;
        }
        let after = self.state();
        if before != after {
            match after {
                HealthState::Disabled => error!(
                    "[LINK] {} garbage messages, link disabled until manual reset",
                    self.garbage_count
                ),
                HealthState::Degraded(n) => warn!("[LINK] link degraded ({} garbage)", n),
                HealthState::Healthy => {}
            }
        }
    }

    fn record_valid(&mut self) {
        if self.garbage_count > 0 {
            debug!("[LINK] valid message, garbage counter reset from {}", self.garbage_count);
        }
        self.garbage_count = 0;
        self.last_change = self.clock.now();
    }

    /// Manual reset back to Healthy.
    pub fn reset(&mut self) {
        self.garbage_count = 0;
        self.disabled = false;
        self.last_change = self.clock.now();
    }

    /// Discard whatever is buffered on the transport, bounded so a stuck line
    /// cannot keep us here forever.
    pub fn drain(&self, transport: &mut dyn Transport) -> usize {
        let limit = self.config.max_message_bytes.max(1) * 4;
        let mut drained = 0;
        while drained < limit {
            match transport.bytes_available() {
                Ok(n) if n > 0 => {}
                _ => break,
            }
            match transport.read_byte(Duration::ZERO) {
                Ok(Some(_)) => drained += 1,
                _ => break,
            }
        }
        drained
    }

    /// Read and classify one message.
    pub fn read_message(&mut self, transport: &mut dyn Transport) -> io::Result<Inbound> {
        if self.disabled {
            self.drain(transport);
            return Ok(Inbound::Ignored);
        }

        let max = self.config.max_message_bytes.max(1);
        let hard_limit = max * 4;
        let mut buf: Vec<u8> = Vec::with_capacity(max);
        let mut consumed = 0usize;
        let mut run_byte = None;
        let mut run_len = 0usize;
        let mut truncated = false;

        while consumed < hard_limit {
            let Some(byte) = transport.read_byte(self.config.inactivity_timeout)? else {
                break;
            };
            consumed += 1;
            if byte == b'\n' {
                break;
            }
            if byte == 0x00 || byte == 0xFF {
                if run_byte == Some(byte) {
                    run_len += 1;
                } else {
                    run_byte = Some(byte);
                    run_len = 1;
                }
                if run_len >= self.config.extreme_run.max(1) {
                    let drained = self.drain(transport);
                    warn!(
                        "[LINK] noise burst: {} x 0x{:02X} ({} more bytes discarded)",
                        run_len, byte, drained
                    );
                    metrics::inc_noise_bursts();
                    self.record_garbage(self.config.noise_threshold.max(1));
                    return Ok(Inbound::NoiseBurst);
                }
            } else {
                run_byte = None;
                run_len = 0;
            }
            if byte == b'\r' {
                continue;
            }
            if buf.len() < max {
                buf.push(byte);
            } else {
                truncated = true;
            }
        }

        if truncated {
            debug!("[LINK] inbound message truncated to {} bytes", max);
        }
        // Whitespace-only frames are keepalives, not chat.
        if buf.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Inbound::Ignored);
        }

        if !printable_ratio_ok(&buf, self.config.min_printable_percent) {
            debug!("[LINK] garbage message: {}", preview_bytes(&buf, 40));
            metrics::inc_garbage_messages();
            self.record_garbage(1);
            return Ok(Inbound::Garbage);
        }

        self.record_valid();
        let text: String = buf
            .iter()
            .filter(|b| (0x20..=0x7E).contains(*b))
            .map(|b| *b as char)
            .collect::<String>()
            .trim()
            .to_string();
        info!("[LINK] mesh chat: {}", escape_log(&text));
        metrics::inc_chat_accepted();
        Ok(Inbound::Chat(ChatMessage {
            text,
            received_at: self.clock.now(),
        }))
    }
}
