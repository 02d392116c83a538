//! Canonical event model shared by every pipeline stage.
//!
//! Every upstream feed record is normalized into a [`CanonicalEvent`]. Text
//! fields are stored in [`Bounded`] strings whose byte limits are part of the
//! contract: ids are at most 63 bytes, kind codes 15, titles 127 and origins 63.
//! Truncation always lands on a UTF-8 character boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Maximum byte length of an event id (the persisted slot is one byte wider).
pub const MAX_ID_BYTES: usize = 63;
pub const MAX_KIND_BYTES: usize = 15;
pub const MAX_TITLE_BYTES: usize = 127;
pub const MAX_ORIGIN_BYTES: usize = 63;

/// Truncate `input` to at most `max_bytes`, retreating to a char boundary.
pub fn truncate_utf8(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut cut = max_bytes;
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    &input[..cut]
}

/// Owned string that never exceeds `MAX` bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Bounded<const MAX: usize>(String);

impl<const MAX: usize> Bounded<MAX> {
    /// Build from any text, truncating to the byte limit.
    pub fn new(text: &str) -> Self {
        Self(truncate_utf8(text, MAX).to_string())
    }

    pub const fn limit() -> usize {
        MAX
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> From<String> for Bounded<MAX> {
    fn from(mut value: String) -> Self {
        let keep = truncate_utf8(&value, MAX).len();
        value.truncate(keep);
        Self(value)
    }
}

impl<const MAX: usize> From<&str> for Bounded<MAX> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<const MAX: usize> From<Bounded<MAX>> for String {
    fn from(value: Bounded<MAX>) -> Self {
        value.0
    }
}

impl<const MAX: usize> Deref for Bounded<MAX> {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const MAX: usize> fmt::Display for Bounded<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type EventId = Bounded<MAX_ID_BYTES>;
pub type KindCode = Bounded<MAX_KIND_BYTES>;
pub type Title = Bounded<MAX_TITLE_BYTES>;
pub type Origin = Bounded<MAX_ORIGIN_BYTES>;

/// Three-step alert scale; the numeric value matches the on-screen colour index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    #[default]
    Green = 0,
    Orange = 1,
    Red = 2,
}

impl AlertLevel {
    /// Map a textual level as published by multi-hazard feeds. Anything other
    /// than exactly `Red` or `Orange` is Green.
    pub fn from_label(label: &str) -> Self {
        match label {
            "Red" => AlertLevel::Red,
            "Orange" => AlertLevel::Orange,
            _ => AlertLevel::Green,
        }
    }

    /// Seismic banding by magnitude.
    pub fn from_magnitude(magnitude: f32) -> Self {
        if magnitude >= 7.0 {
            AlertLevel::Red
        } else if magnitude >= 5.5 {
            AlertLevel::Orange
        } else {
            AlertLevel::Green
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Green => "Green",
            AlertLevel::Orange => "Orange",
            AlertLevel::Red => "Red",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("event id is empty")]
    EmptyId,
}

/// Normalized, source-agnostic disaster record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: EventId,
    pub kind: KindCode,
    pub title: Title,
    pub origin: Origin,
    pub severity: f32,
    pub alert_level: AlertLevel,
    pub freshly_observed: bool,
}

impl CanonicalEvent {
    /// Build an event, rejecting an empty id. Severity is clamped to be
    /// non-negative (NaN becomes zero).
    pub fn new(
        id: &str,
        kind: &str,
        title: &str,
        origin: &str,
        severity: f32,
        alert_level: AlertLevel,
    ) -> Result<Self, EventError> {
        let id = EventId::new(id.trim());
        if id.is_empty() {
            return Err(EventError::EmptyId);
        }
        let severity = if severity.is_finite() && severity > 0.0 {
            severity
        } else {
            0.0
        };
        Ok(Self {
            id,
            kind: KindCode::new(kind),
            title: Title::new(title),
            origin: Origin::new(origin),
            severity,
            alert_level,
            freshly_observed: false,
        })
    }

    /// Human readable name for the kind code, as shown in the alert header.
    pub fn kind_name(&self) -> &'static str {
        kind_name(&self.kind)
    }
}

/// Display name for a hazard kind code.
pub fn kind_name(code: &str) -> &'static str {
    match code {
        "EQ" => "QUAKE",
        "TC" => "CYCLONE",
        "VO" => "VOLCANO",
        "FL" => "FLOOD",
        "DR" => "DROUGHT",
        "WF" => "FIRE",
        "LS" => "SLIDE",
        "CW" => "C.WAVE",
        "EP" => "EPIDEMIC",
        "SW" => "SPACE WX",
        _ => "ALERT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        // "é" is two bytes; a cut at 4 would split it.
        assert_eq!(truncate_utf8("abcé", 4), "abc");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn bounded_fields_apply_documented_limits() {
        let long = "x".repeat(300);
        let ev = CanonicalEvent::new(&long, &long, &long, &long, 1.0, AlertLevel::Green).unwrap();
        assert_eq!(ev.id.len(), MAX_ID_BYTES);
        assert_eq!(ev.kind.len(), MAX_KIND_BYTES);
        assert_eq!(ev.title.len(), MAX_TITLE_BYTES);
        assert_eq!(ev.origin.len(), MAX_ORIGIN_BYTES);
    }

    #[test]
    fn empty_id_is_rejected() {
        let err = CanonicalEvent::new("  ", "EQ", "t", "o", 1.0, AlertLevel::Red).unwrap_err();
        assert_eq!(err, EventError::EmptyId);
    }

    #[test]
    fn negative_and_nan_severity_clamp_to_zero() {
        let ev = CanonicalEvent::new("a", "EQ", "t", "o", -2.0, AlertLevel::Green).unwrap();
        assert_eq!(ev.severity, 0.0);
        let ev = CanonicalEvent::new("a", "EQ", "t", "o", f32::NAN, AlertLevel::Green).unwrap();
        assert_eq!(ev.severity, 0.0);
    }

    #[test]
    fn magnitude_bands() {
        assert_eq!(AlertLevel::from_magnitude(7.0), AlertLevel::Red);
        assert_eq!(AlertLevel::from_magnitude(6.9), AlertLevel::Orange);
        assert_eq!(AlertLevel::from_magnitude(5.5), AlertLevel::Orange);
        assert_eq!(AlertLevel::from_magnitude(5.4), AlertLevel::Green);
    }

    #[test]
    fn kind_names_fall_back_to_alert() {
        assert_eq!(kind_name("EQ"), "QUAKE");
        assert_eq!(kind_name("ZZ"), "ALERT");
    }
}
