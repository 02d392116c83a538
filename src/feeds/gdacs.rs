//! GDACS multi-hazard event list (GeoJSON).

use serde_json::Value;

use super::{json_str, json_text, source_id, Source};
use crate::event::{AlertLevel, CanonicalEvent};

pub const DEFAULT_URL: &str =
    "https://www.gdacs.org/gdacsapi/api/events/geteventlist/SEARCH?alertlevel=red";

pub struct GdacsSource {
    url: String,
}

impl GdacsSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Default for GdacsSource {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl Source for GdacsSource {
    fn tag(&self) -> &'static str {
        "gdacs"
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn normalize(&self, record: &Value) -> Option<CanonicalEvent> {
        let props = record.get("properties").filter(|p| p.is_object())?;
        let id = source_id(self.tag(), props.get("eventid").and_then(json_text));
        let kind = json_str(props, "eventtype").unwrap_or("UNK");
        let name = json_str(props, "name");
        let country = json_str(props, "country");
        let title = match (name, country) {
            (Some(name), Some(country)) => format!("{}, {}", name, country),
            (Some(name), None) => name.to_string(),
            (None, Some(country)) => country.to_string(),
            (None, None) => "Unknown Event".to_string(),
        };
        let level = AlertLevel::from_label(json_str(props, "alertlevel").unwrap_or("Green"));
        let severity = props
            .get("severitydata")
            .and_then(|s| s.get("severity"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;
        CanonicalEvent::new(
            &id,
            kind,
            &title,
            country.unwrap_or("Unknown"),
            severity,
            level,
        )
        .ok()
    }
}
