//! Outbound relay staging.
//!
//! Summaries of newly queued events are staged here during a fetch cycle and
//! sent in one paced burst at the end of it. The radio firmware drops frames
//! that arrive back to back, hence the settle delay and per-line pacing.

use log::{debug, info, warn};
use std::time::Duration;

use super::MeshLink;
use crate::event::{truncate_utf8, CanonicalEvent};
use crate::logutil::{escape_log, truncate_for_log};
use crate::metrics;
use crate::system::Watchdog;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub capacity: usize,
    pub max_line_bytes: usize,
    /// Delay between consecutive lines.
    pub pacing: Duration,
    /// Delay before the first line of a flush.
    pub settle: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            max_line_bytes: 79,
            pacing: Duration::from_millis(500),
            settle: Duration::from_millis(200),
        }
    }
}

fn transliterate(c: char) -> Option<&'static str> {
    let s = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'ñ' => "n",
        'Ñ' => "N",
        'ç' => "c",
        'Ç' => "C",
        'ý' | 'ÿ' => "y",
        'Ý' => "Y",
        'ß' => "ss",
        'æ' => "ae",
        'Æ' => "AE",
        _ => return None,
    };
    Some(s)
}

/// Reduce text to what the radio link carries safely: letters, digits,
/// space, `.` and `-`. Accented Latin-1 letters are transliterated; commas
/// and other separators become spaces; everything else is dropped. Runs of
/// spaces collapse.
pub fn sanitize_for_radio(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
        } else if let Some(ascii) = transliterate(c) {
            out.push_str(ascii);
        } else if c.is_whitespace() || c == ',' || c == '/' || c == '_' {
            if !out.ends_with(' ') && !out.is_empty() {
                out.push(' ');
            }
        }
    }
    out.trim_end().to_string()
}

/// One-line relay summary: `"<KIND NAME> M<sev> <title>"`, with the severity
/// part omitted when it is zero.
pub fn format_summary(event: &CanonicalEvent) -> String {
    let line = if event.severity > 0.0 {
        format!("{} M{:.1} {}", event.kind_name(), event.severity, event.title)
    } else {
        format!("{} {}", event.kind_name(), event.title)
    };
    sanitize_for_radio(&line)
}

pub struct RelayFramer {
    config: RelayConfig,
    lines: Vec<String>,
}

impl RelayFramer {
    pub fn new(config: RelayConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config: RelayConfig { capacity, ..config },
            lines: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn pending(&self) -> &[String] {
        &self.lines
    }

    /// Truncate and append. A full queue drops the new line; returns whether
    /// it was staged.
    pub fn stage(&mut self, text: &str) -> bool {
        if self.lines.len() >= self.config.capacity {
            warn!(
                "[RELAY] queue full ({}), dropping: {}",
                self.lines.len(),
                truncate_for_log(&escape_log(text), 40)
            );
            metrics::inc_relay_dropped();
            return false;
        }
        let line = truncate_utf8(text, self.config.max_line_bytes).to_string();
        self.lines.push(line);
        debug!("[RELAY] staged {}/{}", self.lines.len(), self.config.capacity);
        true
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Send everything staged, paced, then empty the queue. Returns the number
    /// of lines written. Nothing is sent (and the queue is discarded) while
    /// the link is disabled.
    pub async fn flush(&mut self, link: &mut MeshLink, watchdog: &dyn Watchdog) -> usize {
        if self.lines.is_empty() {
            return 0;
        }
        if !link.can_send() {
            warn!(
                "[RELAY] link disabled, discarding {} staged messages",
                self.lines.len()
            );
            self.lines.clear();
            return 0;
        }
        info!("[RELAY] flushing {} queued messages", self.lines.len());
        if !self.config.settle.is_zero() {
            tokio::time::sleep(self.config.settle).await;
        }
        let mut sent = 0;
        for line in self.lines.drain(..) {
            watchdog.feed();
            if link.send_line(&line) {
                sent += 1;
            }
            if !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
        }
        sent
    }
}
