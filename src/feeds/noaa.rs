//! NOAA SWPC space-weather alert products.
//!
//! The feed is a bare JSON array of `{product_id, issue_datetime, message}`.
//! Severity comes from keywords in the free-text message, checked against an
//! ordered rule table where the first matching rule wins.

use serde_json::Value;

use super::{json_str, Source};
use crate::event::{AlertLevel, CanonicalEvent};

pub const DEFAULT_URL: &str = "https://services.swpc.noaa.gov/products/alerts.json";

struct Rule {
    keywords: &'static [&'static str],
    level: AlertLevel,
    severity: f32,
}

const RULES: &[Rule] = &[
    Rule {
        keywords: &["Extreme", "G5", "X"],
        level: AlertLevel::Red,
        severity: 5.0,
    },
    Rule {
        keywords: &["Severe", "G4", "Strong", "G3"],
        level: AlertLevel::Orange,
        severity: 3.0,
    },
];

const FALLBACK: (AlertLevel, f32) = (AlertLevel::Green, 1.0);

/// Case-sensitive substring match. A single-letter keyword (the `X` flare
/// class) must also stand alone: the char before must not be alphanumeric and
/// the char after must be neither a letter nor `-`, so `X` matches in `X1.2`
/// or `(X)` but not in `X-ray` or `EXTENDED`.
fn contains_keyword(text: &str, keyword: &str) -> bool {
    if keyword.len() > 1 {
        return text.contains(keyword);
    }
    text.match_indices(keyword).any(|(start, _)| {
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[start + keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphabetic() && c != '-');
        before_ok && after_ok
    })
}

/// Level and severity for an alert message.
pub fn classify(message: &str) -> (AlertLevel, f32) {
    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| contains_keyword(message, k)))
        .map_or(FALLBACK, |rule| (rule.level, rule.severity))
}

/// Headline of a product message: the text after the first `ALERT:`,
/// `WARNING:`, `WATCH:` or `SUMMARY:` line prefix, else the first non-empty line.
fn headline(message: &str) -> &str {
    const PREFIXES: [&str; 4] = ["ALERT:", "WARNING:", "WATCH:", "SUMMARY:"];
    let lines = message.lines().map(str::trim).filter(|l| !l.is_empty());
    for line in lines.clone() {
        for prefix in PREFIXES {
            if let Some(rest) = line.strip_prefix(prefix) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    return rest;
                }
            }
        }
    }
    lines
        .into_iter()
        .next()
        .unwrap_or("Space Weather Alert")
}

pub struct NoaaSource {
    url: String,
}

impl NoaaSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for NoaaSource {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl Source for NoaaSource {
    fn tag(&self) -> &'static str {
        "noaa"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn records<'a>(&self, doc: &'a Value) -> Vec<&'a Value> {
        doc.as_array()
            .map(|items| items.iter().collect())
            .unwrap_or_default()
    }

    fn normalize(&self, record: &Value) -> Option<CanonicalEvent> {
        record.as_object()?;
        // Issue times keep only their digits so ids stay compact.
        let id = match json_str(record, "product_id") {
            Some(product) => {
                let issued: String = json_str(record, "issue_datetime")
                    .unwrap_or_default()
                    .chars()
                    .filter(char::is_ascii_digit)
                    .collect();
                if issued.is_empty() {
                    format!("noaa_{}", product)
                } else {
                    format!("noaa_{}_{}", product, issued)
                }
            }
            None => "noaa_unknown".to_string(),
        };
        let message = json_str(record, "message").unwrap_or_default();
        let (level, severity) = classify(message);
        CanonicalEvent::new(&id, "SW", headline(message), "NOAA SWPC", severity, level).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_order_first_match_wins() {
        assert_eq!(classify("G5 (Extreme) storm"), (AlertLevel::Red, 5.0));
        assert_eq!(classify("Strong G3 storm, upgrade possible to Extreme"), (AlertLevel::Red, 5.0));
        assert_eq!(classify("WARNING: Geomagnetic K-index of 7 (G3 Strong)"), (AlertLevel::Orange, 3.0));
        assert_eq!(classify("ALERT: Electron 2MeV Integral Flux"), (AlertLevel::Green, 1.0));
    }

    #[test]
    fn x_class_needs_a_token_boundary() {
        assert_eq!(classify("X-ray Event exceeded M5").0, AlertLevel::Green);
        assert_eq!(classify("X1.2 flare observed").0, AlertLevel::Red);
        assert_eq!(classify("EXTENDED WARNING").0, AlertLevel::Green);
        // Case sensitive.
        assert_eq!(classify("extreme").0, AlertLevel::Green);
    }

    #[test]
    fn word_keywords_match_anywhere() {
        assert_eq!(classify("Extremely high flux"), (AlertLevel::Red, 5.0));
        assert_eq!(classify("NOAA Scale: G4-Severe"), (AlertLevel::Orange, 3.0));
        assert!(contains_keyword("NOAA Scale: G4-Severe", "G4"));
        assert_eq!(classify("StrongER than forecast"), (AlertLevel::Orange, 3.0));
        assert_eq!(classify("Proton event G5+"), (AlertLevel::Red, 5.0));
    }

    #[test]
    fn product_record() {
        let record = json!({
            "product_id": "K07A",
            "issue_datetime": "2024-05-10 17:02:15.513",
            "message": "Space Weather Message Code: ALTK07\r\nALERT: Geomagnetic K-index of 7\r\nNOAA Scale: G3 - Strong"
        });
        let ev = NoaaSource::default().normalize(&record).unwrap();
        assert_eq!(ev.id.as_str(), "noaa_K07A_20240510170215513");
        assert_eq!(ev.title.as_str(), "Geomagnetic K-index of 7");
        assert_eq!(ev.alert_level, AlertLevel::Orange);
        assert_eq!(ev.severity, 3.0);
        assert_eq!(ev.kind_name(), "SPACE WX");
    }

    #[test]
    fn records_come_from_top_level_array() {
        let doc = json!([{ "message": "hello" }, { "message": "x" }]);
        let src = NoaaSource::default();
        assert_eq!(src.records(&doc).len(), 2);
        let ev = src.normalize(src.records(&doc)[0]).unwrap();
        assert_eq!(ev.id.as_str(), "noaa_unknown");
        assert_eq!(ev.title.as_str(), "hello");
    }
}
